pub mod dial;
pub mod fields;
pub mod http;
pub mod probe_loop;
pub mod result;
pub mod scheduler;
pub mod socket;
pub mod target;
pub mod timer;
