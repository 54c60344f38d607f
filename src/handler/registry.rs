//! Operation registry: op code → handlers.
//!
//! The registry is populated through [`OpRegistryBuilder`] before any
//! traffic flows and is immutable afterwards. Lookup is a linear scan over
//! the fixed entry list; registries are small (a handful of operations)
//! and built once at startup.
//!
//! # Example
//!
//! ```
//! use cmdlink::handler::OpRegistry;
//!
//! let registry = OpRegistry::builder()
//!     .request(0x11, |_req, responder| responder.send(b"ok"))
//!     .response(0x20, |rsp| println!("got {} bytes", rsp.len()))
//!     .build();
//!
//! assert!(registry.lookup(0x11).is_some());
//! assert!(registry.lookup(0x7F).is_none());
//! ```

use std::sync::Arc;

use super::context::Responder;
use super::{RequestHandler, ResponseHandler};
use crate::error::Result;

/// One registered operation.
pub struct OpEntry {
    op_code: u8,
    on_request: Option<RequestHandler>,
    on_response: Option<ResponseHandler>,
}

impl OpEntry {
    fn new(op_code: u8) -> Self {
        Self {
            op_code,
            on_request: None,
            on_response: None,
        }
    }

    /// The opcode this entry serves.
    #[inline]
    pub fn op_code(&self) -> u8 {
        self.op_code
    }

    /// Clone out the request handler, if one is registered.
    pub fn request_handler(&self) -> Option<RequestHandler> {
        self.on_request.clone()
    }

    /// Clone out the response handler, if one is registered.
    pub fn response_handler(&self) -> Option<ResponseHandler> {
        self.on_response.clone()
    }
}

/// Immutable op code → handler table with linear lookup.
pub struct OpRegistry {
    entries: Vec<OpEntry>,
}

impl OpRegistry {
    /// Start building a registry.
    pub fn builder() -> OpRegistryBuilder {
        OpRegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Find the entry for `op_code`.
    pub fn lookup(&self, op_code: u8) -> Option<&OpEntry> {
        self.entries.iter().find(|e| e.op_code == op_code)
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = &OpEntry> {
        self.entries.iter()
    }
}

/// Builder for [`OpRegistry`].
///
/// Entries are keyed by opcode: registering a request and a response
/// handler for the same opcode merges into one entry, and registering the
/// same slot twice keeps the last handler.
pub struct OpRegistryBuilder {
    entries: Vec<OpEntry>,
}

impl OpRegistryBuilder {
    fn entry_mut(&mut self, op_code: u8) -> &mut OpEntry {
        if let Some(idx) = self.entries.iter().position(|e| e.op_code == op_code) {
            return &mut self.entries[idx];
        }
        self.entries.push(OpEntry::new(op_code));
        self.entries.last_mut().expect("entry just pushed")
    }

    /// Register the request handler for `op_code`.
    pub fn request<F>(mut self, op_code: u8, handler: F) -> Self
    where
        F: for<'a> Fn(&[u8], &mut Responder<'a>) -> Result<()> + Send + Sync + 'static,
    {
        self.entry_mut(op_code).on_request = Some(Arc::new(handler));
        self
    }

    /// Register the response handler for `op_code`.
    pub fn response<F>(mut self, op_code: u8, handler: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.entry_mut(op_code).on_response = Some(Arc::new(handler));
        self
    }

    /// Register an opcode with neither handler.
    ///
    /// An incoming request for it is answered with an empty response; a
    /// response for it is delivered to the event observer only.
    pub fn operation(mut self, op_code: u8) -> Self {
        self.entry_mut(op_code);
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> OpRegistry {
        OpRegistry {
            entries: self.entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_finds_registered_op() {
        let registry = OpRegistry::builder()
            .request(0x11, |_req, _responder| Ok(()))
            .build();

        let entry = registry.lookup(0x11).unwrap();
        assert_eq!(entry.op_code(), 0x11);
        assert!(entry.request_handler().is_some());
        assert!(entry.response_handler().is_none());
    }

    #[test]
    fn test_lookup_unknown_op_is_none() {
        let registry = OpRegistry::builder().operation(0x11).build();
        assert!(registry.lookup(0x12).is_none());
    }

    #[test]
    fn test_request_and_response_merge_into_one_entry() {
        let registry = OpRegistry::builder()
            .request(0x20, |_req, _responder| Ok(()))
            .response(0x20, |_rsp| {})
            .build();

        assert_eq!(registry.len(), 1);
        let entry = registry.lookup(0x20).unwrap();
        assert!(entry.request_handler().is_some());
        assert!(entry.response_handler().is_some());
    }

    #[test]
    fn test_bare_operation_has_no_handlers() {
        let registry = OpRegistry::builder().operation(0x30).build();
        let entry = registry.lookup(0x30).unwrap();
        assert!(entry.request_handler().is_none());
        assert!(entry.response_handler().is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = OpRegistry::builder().build();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert_eq!(registry.iter().count(), 0);
    }

    #[test]
    fn test_iter_preserves_registration_order() {
        let registry = OpRegistry::builder()
            .operation(0x31)
            .operation(0x11)
            .operation(0x21)
            .build();

        let codes: Vec<u8> = registry.iter().map(|e| e.op_code()).collect();
        assert_eq!(codes, vec![0x31, 0x11, 0x21]);
    }
}
