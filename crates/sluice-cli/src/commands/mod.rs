pub mod batches;
pub mod dispatches;
pub mod drift;
pub mod ingest;
pub mod pipes;
pub mod receipts;
pub mod register;
pub mod reset;
pub mod rows;
pub mod schemas;
pub mod signal;
pub mod stats;
