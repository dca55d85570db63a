//! The cache proper: packet types, FIFO queues and MSHR, the superblock tag
//! array, and the top-level controller that drives them every tick.

pub mod block;
pub mod controller;
pub mod packet;
pub mod queues;
pub mod tag_array;

pub use controller::{Cache, CorePort, Downstream, MainMemory};
pub use packet::{AccessType, Packet, QueueKind};
