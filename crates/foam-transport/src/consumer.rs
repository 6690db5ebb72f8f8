//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Consumer contract shared by transport sources."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::record::Record;
use crate::Result;

/// Source of decoded acquisition records.
pub trait Consumer: Send {
    /// Wait for the next record, bounded by the consumer's timeout.
    /// An idle transport yields [`TransportError::Timeout`](crate::TransportError::Timeout).
    fn next(&mut self) -> Result<Record>;

    /// Release the underlying socket. Further calls to `next` fail with
    /// [`TransportError::Closed`](crate::TransportError::Closed).
    fn close(&mut self);

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

impl<C: Consumer + ?Sized> Consumer for Box<C> {
    fn next(&mut self) -> Result<Record> {
        (**self).next()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
