//! CD drive access: libcdio wrapper, TOC reading, paranoid audio
//! reads, and the rip engine.

pub mod drive;
pub mod ffi;
pub mod paranoia;
pub mod ripper;
