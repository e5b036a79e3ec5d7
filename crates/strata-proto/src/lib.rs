//! Strata Proto - Wire protocol
//!
//! Defines the packet request/reply unit exchanged with clients, peer
//! replicas and the master, its opcode and result-code tables, the frame
//! codec, and the admin-task envelopes carried by control-plane packets.

pub mod admin;
pub mod opcode;
pub mod packet;

pub use admin::{AdminTask, TaskStatus};
pub use opcode::{Opcode, ResultCode};
pub use packet::{HEADER_SIZE, MAX_PACKET_DATA, PACKET_MAGIC, Packet};
