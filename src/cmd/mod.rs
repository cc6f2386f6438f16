//! Daemon entrypoints: the supervision main loop and the one-shot
//! restart path.

pub mod restart_one;
pub mod root;
