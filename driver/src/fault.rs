//! Error event notification
//!
//! The block raises four error interrupts; each carries a fault address
//! latch. Events are resolved to the owning buffer by containment scan and
//! delivered synchronously to every subscriber in registration order.

use std::sync::Mutex;

use log::debug;

use crate::error::{DriverError, Result};
use crate::lock_mutex;
use crate::BufferHandle;

/// Direction of a failed range translation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Which translation context an address-translation fault hit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationContext {
    Descriptor,
    Buffer,
    Unknown,
}

/// A hardware error event as delivered to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEvent {
    /// Compression failed at `address`
    Encode {
        handle: Option<BufferHandle>,
        address: u64,
    },
    /// Decompression failed at `address`
    Decode {
        handle: Option<BufferHandle>,
        address: u64,
    },
    /// A device access fell outside every enabled range
    RangeTranslation {
        handle: Option<BufferHandle>,
        address: u64,
        access: AccessKind,
    },
    /// The system translation unit faulted on a driver mapping
    AddressTranslation {
        handle: Option<BufferHandle>,
        context: TranslationContext,
        address: u64,
        flags: u32,
    },
}

pub type ErrorHandler = Box<dyn Fn(&ErrorEvent) + Send + Sync>;

struct HandlerNode {
    client_id: u32,
    handler: ErrorHandler,
}

/// Subscriber list, invoked in registration order
pub(crate) struct FaultNotifier {
    handlers: Mutex<Vec<HandlerNode>>,
}

impl FaultNotifier {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, client_id: u32, handler: ErrorHandler) {
        debug!("error handler registered for client {client_id}");
        lock_mutex(&self.handlers).push(HandlerNode { client_id, handler });
    }

    /// Remove every handler of a client
    pub fn unregister(&self, client_id: u32) -> Result<()> {
        let mut handlers = lock_mutex(&self.handlers);
        let before = handlers.len();
        handlers.retain(|node| node.client_id != client_id);
        if handlers.len() == before {
            return Err(DriverError::UnknownHandler(client_id));
        }
        Ok(())
    }

    pub fn notify(&self, event: &ErrorEvent) {
        for node in lock_mutex(&self.handlers).iter() {
            (node.handler)(event);
        }
    }

    pub fn len(&self) -> usize {
        lock_mutex(&self.handlers).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_notify_runs_in_registration_order() {
        let notifier = FaultNotifier::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in [1u32, 2, 3] {
            let order = Arc::clone(&order);
            notifier.register(tag, Box::new(move |_| order.lock().unwrap().push(tag)));
        }

        notifier.notify(&ErrorEvent::Encode {
            handle: None,
            address: 0x100,
        });
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unregister_removes_all_client_handlers() {
        let notifier = FaultNotifier::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for client in [9u32, 9, 4] {
            let hits = Arc::clone(&hits);
            notifier.register(client, Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }));
        }

        notifier.unregister(9).unwrap();
        assert_eq!(notifier.len(), 1);
        notifier.notify(&ErrorEvent::Decode {
            handle: None,
            address: 0,
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(matches!(
            notifier.unregister(9),
            Err(DriverError::UnknownHandler(9))
        ));
    }
}
