//! Fixed-capacity circular byte buffer for staging streamed I/O, plus a
//! delimiter framer that drives it from files or stdin.
//!
//! ```
//! use ringstage::RingBuffer;
//!
//! let mut buf = RingBuffer::new(5).unwrap();
//! assert_eq!(buf.capacity(), 8);
//!
//! buf.append(b"GET /\r\nrest").unwrap_err(); // 11 bytes never fit in 8
//! buf.append(b"ping\r\n").unwrap();
//! let end = buf.search(b"\r\n");
//! assert_eq!(end, 6);
//!
//! let mut line = vec![0u8; end];
//! buf.remove(&mut line).unwrap();
//! assert_eq!(line, b"ping\r\n");
//! assert!(buf.is_empty());
//! ```

pub mod config;
pub mod error;
pub mod framer;
pub mod ring_buffer;
pub mod sources;

pub use error::Error;
pub use framer::{Frame, Framer};
pub use ring_buffer::{is_power_of_two, round_up_power_of_two, RingBuffer};
