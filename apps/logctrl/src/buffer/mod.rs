mod ring;

pub use ring::RingBuffer;
