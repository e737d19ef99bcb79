use std::sync::Arc;

use tracing::{debug, info};

use super::payload::{Dispatch, DispatchData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// `READY` or `RESUMED`; the client waits on these during a handshake.
    Lifecycle,
    Unhandled,
}

pub fn route(dispatch: &Dispatch) -> Route {
    match dispatch.data {
        DispatchData::Ready(_) | DispatchData::Resumed => Route::Lifecycle,
        DispatchData::Other(_) => Route::Unhandled,
    }
}

/// Receives every dispatch event the gateway pushes, in arrival order.
///
/// Called from the listener task, so implementations should hand heavy work
/// off to their own tasks instead of blocking.
pub trait EventHandler: Send + Sync {
    fn handle(&self, dispatch: &Dispatch, route: Route);
}

#[derive(Debug, Default)]
pub struct LogEvents;

impl EventHandler for LogEvents {
    fn handle(&self, dispatch: &Dispatch, route: Route) {
        match route {
            Route::Lifecycle => info!(
                event = %dispatch.name,
                sequence = ?dispatch.sequence,
                "session lifecycle event"
            ),
            Route::Unhandled => debug!(
                event = %dispatch.name,
                sequence = ?dispatch.sequence,
                "unhandled dispatch event"
            ),
        }
    }
}

#[derive(Clone)]
pub struct DispatchRouter(Arc<dyn EventHandler>);

impl DispatchRouter {
    pub fn new(handler: impl EventHandler + 'static) -> Self {
        DispatchRouter(Arc::new(handler))
    }

    pub(crate) fn deliver(&self, dispatch: &Dispatch) -> Route {
        let route = route(dispatch);
        self.0.handle(dispatch, route);
        route
    }
}

impl Default for DispatchRouter {
    fn default() -> Self {
        DispatchRouter::new(LogEvents)
    }
}
