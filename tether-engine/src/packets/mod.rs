mod packetizer;
mod streamer;

pub use packetizer::Packetizer;
pub use streamer::Streamer;
