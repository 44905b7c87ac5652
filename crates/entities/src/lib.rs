pub mod atomic_fact;
pub mod compression_stat;
pub mod conversation_window;
