//! Background delivery loop for the Postbox email queue.

pub mod poller;
