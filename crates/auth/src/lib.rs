#![forbid(unsafe_code)]
#![forbid(non_ascii_idents)]

pub mod access_control;
pub mod ssha;
