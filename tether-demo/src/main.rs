#[macro_use]
extern crate log;

use std::time::{Duration, Instant};

use serde_json::json;
use structopt::StructOpt;

use tether_client::{ClientEvent, ClientSettings, MqttClient};
use tether_protocol::QoS;
use tether_streams::TcpTransport;

#[derive(StructOpt)]
pub struct Options {
    #[structopt(short = "h", long = "hostname")]
    pub hostname: String,

    #[structopt(short = "p", long = "port", default_value = "1883")]
    pub port: u16,

    #[structopt(short = "c", long = "client-id")]
    pub client_id: Option<String>,

    #[structopt(short = "t", long = "topic", default_value = "tether/demo")]
    pub topic: String,

    #[structopt(short = "u", long = "username")]
    pub username: Option<String>,

    #[structopt(long = "password")]
    pub password: Option<String>,

    #[structopt(long = "keepalive", default_value = "30")]
    pub keepalive_secs: u16,
}

impl Options {
    pub fn client_settings(&self) -> ClientSettings {
        let mut settings = ClientSettings::new().with_keepalive(self.keepalive_secs);
        if let Some(ref client_id) = self.client_id {
            settings = settings.with_client_id(client_id);
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            settings = settings.with_credentials(username, password.as_bytes());
        }
        settings
    }
}

pub fn main() {
    env_logger::init();
    let options = Options::from_args();
    debug!("Connecting to {}:{}", options.hostname, options.port);

    let transport = TcpTransport::new(&options.hostname, options.port);
    let mut client = MqttClient::new(transport, options.client_settings());
    client.connect(Instant::now()).unwrap();

    let budget = Duration::from_millis(20);
    let tx_freq = Duration::from_secs(3);
    let mut last_telemetry_instant = Instant::now();
    let mut sequence = 0u64;

    loop {
        let now = Instant::now();
        client.process(now, budget);

        while let Some(event) = client.poll_event() {
            match event {
                ClientEvent::Connected { session_present } => {
                    info!("Connected, session present: {}", session_present);
                    client
                        .subscribe(vec![(options.topic.clone(), QoS::AtLeastOnce)], now)
                        .unwrap();
                }
                ClientEvent::Message(msg) => {
                    info!(
                        "Message on {}: {}",
                        msg.topic,
                        String::from_utf8_lossy(&msg.payload)
                    );
                }
                ClientEvent::Failed(reason) => {
                    panic!("Client gave up: {:?}", reason);
                }
                other => debug!("Event: {:?}", other),
            }
        }

        if client.is_connected() && last_telemetry_instant.elapsed() > tx_freq {
            let payload = json!({ "greeting": "hello", "sequence": sequence });
            client
                .publish(
                    &options.topic,
                    payload.to_string().into_bytes(),
                    QoS::AtLeastOnce,
                    false,
                    now,
                )
                .unwrap();
            sequence += 1;
            last_telemetry_instant = now;
        }

        std::thread::sleep(Duration::from_millis(1));
    }
}
