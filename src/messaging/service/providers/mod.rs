pub mod in_memory;
pub mod pgmq;

pub use in_memory::InMemoryMessagingService;
pub use pgmq::PgmqMessagingService;
