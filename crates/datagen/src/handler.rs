// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Handlers receive every point an agent measures.
//!
//! Handlers run inside the agent's task, one after the other in the order
//! they were attached. A handler that blocks throttles its agent, so the
//! queue-backed [`QueueHandler`] only pushes onto the [`IngestQueue`] and
//! returns.

use std::fmt::Debug;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use crate::error::HandlerError;
use crate::point::{Destination, Point, QueueItem};
use crate::queue::IngestQueue;

pub const DEFAULT_INDEX: &str = "datagen";
pub const DEFAULT_DOC_TYPE: &str = "random";

/// Consumes one point at a time.
///
/// Implementations are shared between agents and may be called from many
/// tasks at once.
pub trait Handler: Send + Sync {
    fn handle(&self, point: &Point) -> Result<(), HandlerError>;
}

pub type RouteFn = Arc<dyn Fn(&Point) -> String + Send + Sync>;

/// Picks the index a point is written to.
#[derive(Clone)]
pub enum Route {
    Fixed(String),
    /// Computed from the point, once per point.
    Dynamic(RouteFn),
}

impl Route {
    pub fn resolve(&self, point: &Point) -> String {
        match self {
            Route::Fixed(index) => index.clone(),
            Route::Dynamic(route_fn) => route_fn(point),
        }
    }
}

impl Default for Route {
    fn default() -> Self {
        Route::Fixed(DEFAULT_INDEX.to_string())
    }
}

impl Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Fixed(index) => write!(f, "Route::Fixed({index})"),
            Route::Dynamic(_) => write!(f, "Route::Dynamic"),
        }
    }
}

/// Routes each point to a destination and puts it on the ingestion queue.
#[derive(Debug, Clone)]
pub struct QueueHandler {
    queue: IngestQueue,
    route: Route,
    doc_type: String,
}

impl QueueHandler {
    pub fn new(queue: IngestQueue, route: Route, doc_type: impl Into<String>) -> Self {
        Self {
            queue,
            route,
            doc_type: doc_type.into(),
        }
    }
}

impl Handler for QueueHandler {
    fn handle(&self, point: &Point) -> Result<(), HandlerError> {
        let destination = Destination {
            index: self.route.resolve(point),
            doc_type: self.doc_type.clone(),
        };
        self.queue
            .enqueue(QueueItem::with_destination(point.clone(), destination));
        Ok(())
    }
}

/// Pretty-prints every point. Meant for eyeballing a run, not for load.
pub struct PrintHandler {
    out: Mutex<Box<dyn Write + Send>>,
}

impl PrintHandler {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }
}

impl Debug for PrintHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrintHandler")
    }
}

impl Handler for PrintHandler {
    fn handle(&self, point: &Point) -> Result<(), HandlerError> {
        let rendered = serde_json::to_string_pretty(point)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| HandlerError::Other("print handler lock poisoned".to_string()))?;
        writeln!(out, "{rendered}")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_queue_handler_fixed_route() {
        let queue = IngestQueue::new();
        let handler = QueueHandler::new(queue.clone(), Route::default(), DEFAULT_DOC_TYPE);

        handler
            .handle(&Point::new("agent.random.1", 7, 1000))
            .expect("handle failed");

        assert_eq!(queue.outstanding(), 1);
        let item = queue.try_dequeue().expect("item should be queued");
        assert_eq!(item.point, Point::new("agent.random.1", 7, 1000));
        assert_eq!(
            item.destination,
            Some(Destination {
                index: "datagen".to_string(),
                doc_type: "random".to_string(),
            })
        );
    }

    #[test]
    fn test_queue_handler_dynamic_route_called_once_per_point() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_route = Arc::clone(&calls);
        let route = Route::Dynamic(Arc::new(move |point: &Point| {
            calls_in_route.fetch_add(1, Ordering::SeqCst);
            format!("datagen-{}", point.name())
        }));

        let queue = IngestQueue::new();
        let handler = QueueHandler::new(queue.clone(), route, "random");
        handler
            .handle(&Point::new("agent.random.2", 1, 0))
            .expect("handle failed");
        handler
            .handle(&Point::new("agent.random.3", 1, 0))
            .expect("handle failed");

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let indexes: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .filter_map(|item| item.destination.map(|d| d.index))
            .collect();
        assert_eq!(indexes, vec!["datagen-agent.random.2", "datagen-agent.random.3"]);
    }

    #[test]
    fn test_print_handler_writes_pretty_json() {
        let buffer = SharedBuffer::default();
        let handler = PrintHandler::new(buffer.clone());
        handler
            .handle(&Point::new("agent.random.1", 3, 5))
            .expect("handle failed");

        let written = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(written.contains("\"name\": \"agent.random.1\""));
        assert!(written.contains("\"value\": 3"));
        assert!(written.contains("\"time\": 5"));
        assert!(written.ends_with('\n'));
    }
}
