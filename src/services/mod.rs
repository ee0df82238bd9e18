//! Core runtime services for the ingestion system.

pub mod event_bus;
pub mod job_queue;
pub mod monitor;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod scheduler;

pub use event_bus::{BusEvent, BusPayload, EventBus, EventBusConfig, EventId, SequenceNumber, Topic};
pub use job_queue::{JobHandler, JobQueue, QueueEvent};
pub use monitor::RealtimeMonitor;
pub use pipeline::{EventPipeline, PipelineOutcome, PipelineStats};
pub use registry::ConnectorRegistry;
pub use scheduler::PollScheduler;
