//! URL routing: ordered layers of middleware and route handlers with
//! error-handling chains, sub-routers and mid-chain detach/resume.
//!
//! A router is an ordered list of *layers*. Each layer pairs a compiled
//! pattern with entries holding handlers; middleware layers match path
//! prefixes, route layers require the full path and filter by method.
//! Dispatch walks the layers in declaration order, moving matched
//! prefixes from `path` into `base_path`, and interprets each handler's
//! [`RouteResult`].

pub mod pattern;
mod view;

use std::sync::Arc;

use pattern::Pattern;
pub use view::{Request, Response, Resumer};

use crate::error::Error;
use crate::proto::http1::Method;

/// What a route handler tells the dispatcher to do next.
///
/// Exactly one of these must be returned from every handler; there is
/// no "plain success".
#[derive(Debug)]
pub enum RouteResult {
    /// The response is prepared; the session should send it.
    ///
    /// A handler that produced partial serializer output must return
    /// this, never `Next`.
    Send,
    /// The response has already been fully serialized; skip the write.
    Complete,
    /// Close the connection without another response.
    Close,
    /// Not handled here; continue with the next entry.
    Next,
    /// Skip the remaining entries of the current route layer.
    /// Middleware must not return this.
    NextRoute,
    /// The handler took over the session via [`Response::detach`].
    Detach,
    /// A genuine failure; switches dispatch into error-handling mode.
    Err(Error),
}

impl From<Error> for RouteResult {
    fn from(e: Error) -> Self {
        RouteResult::Err(e)
    }
}

/// A plain route handler.
pub type HandlerFn = dyn Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync;
/// An error handler; runs only in error-handling mode.
pub type ErrorHandlerFn = dyn Fn(&mut Request, &mut Response, &Error) -> RouteResult + Send + Sync;

enum Handler {
    Fn(Arc<HandlerFn>),
    Error(Arc<ErrorHandlerFn>),
    Router(Arc<Router>),
}

impl Handler {
    /// Traversal positions this handler accounts for: itself, plus
    /// everything inside a sub-router.
    fn count(&self) -> usize {
        match self {
            Handler::Fn(_) | Handler::Error(_) => 1,
            Handler::Router(r) => 1 + r.count(),
        }
    }
}

impl Clone for Handler {
    fn clone(&self) -> Self {
        match self {
            Handler::Fn(f) => Handler::Fn(f.clone()),
            Handler::Error(f) => Handler::Error(f.clone()),
            Handler::Router(r) => Handler::Router(r.clone()),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum EntryKind {
    Middleware,
    ErrorHandler,
    /// Route entry; `None` matches every method.
    Method(Option<MethodKey>),
}

// Method carries a String for custom verbs; keep the common case copy.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MethodKey {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Trace,
    Connect,
}

impl MethodKey {
    fn matches(self, m: &Method) -> bool {
        matches!(
            (self, m),
            (MethodKey::Get, Method::Get)
                | (MethodKey::Head, Method::Head)
                | (MethodKey::Post, Method::Post)
                | (MethodKey::Put, Method::Put)
                | (MethodKey::Delete, Method::Delete)
                | (MethodKey::Patch, Method::Patch)
                | (MethodKey::Options, Method::Options)
                | (MethodKey::Trace, Method::Trace)
                | (MethodKey::Connect, Method::Connect)
        )
    }

    fn from_method(m: &Method) -> Option<Self> {
        match m {
            Method::Get => Some(MethodKey::Get),
            Method::Head => Some(MethodKey::Head),
            Method::Post => Some(MethodKey::Post),
            Method::Put => Some(MethodKey::Put),
            Method::Delete => Some(MethodKey::Delete),
            Method::Patch => Some(MethodKey::Patch),
            Method::Options => Some(MethodKey::Options),
            Method::Trace => Some(MethodKey::Trace),
            Method::Connect => Some(MethodKey::Connect),
            Method::Other(_) => None,
        }
    }
}

#[derive(Clone)]
struct Entry {
    kind: EntryKind,
    handler: Handler,
}

#[derive(Clone)]
struct Layer {
    pattern: Pattern,
    /// Exact match (route layer) vs prefix match (middleware layer).
    end: bool,
    entries: Vec<Entry>,
}

impl Layer {
    fn count(&self) -> usize {
        self.entries.iter().map(|e| e.handler.count()).sum()
    }
}

/// A container of route handlers.
///
/// Handlers are installed with [`get`](Router::get)/[`post`](Router::post)/
/// [`all`](Router::all) and friends, middleware with
/// [`wrap`](Router::wrap), error handlers with [`err`](Router::err) and
/// nested routers with [`mount`](Router::mount). Dispatch visits
/// matching handlers in declaration order.
///
/// Routers clone cheaply (handlers are shared) and a mounted router is
/// reference-counted by its parent.
#[derive(Clone, Default)]
pub struct Router {
    layers: Vec<Layer>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware handler for a path prefix.
    ///
    /// The handler runs for every request whose path begins with
    /// `pattern`, regardless of method. An empty pattern means the
    /// root scope.
    ///
    /// # Panics
    ///
    /// Panics if the pattern does not compile.
    pub fn wrap<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        let pattern = if pattern.is_empty() { "/" } else { pattern };
        self.layers.push(Layer {
            pattern: Pattern::compile(pattern).unwrap_or_else(|e| panic!("{e}")),
            end: false,
            entries: vec![Entry {
                kind: EntryKind::Middleware,
                handler: Handler::Fn(Arc::new(handler)),
            }],
        });
    }

    /// Add an error handler. Error handlers run, in declaration order,
    /// only after some handler has returned [`RouteResult::Err`].
    pub fn err<H>(&mut self, handler: H)
    where
        H: Fn(&mut Request, &mut Response, &Error) -> RouteResult + Send + Sync + 'static,
    {
        self.layers.push(Layer {
            pattern: Pattern::compile("/").unwrap(),
            end: false,
            entries: vec![Entry {
                kind: EntryKind::ErrorHandler,
                handler: Handler::Error(Arc::new(handler)),
            }],
        });
    }

    /// Mount a sub-router at a path prefix. The sub-router sees the
    /// path relative to the matched prefix and participates in
    /// resume-position counting as one entry of this router.
    pub fn mount(&mut self, pattern: &str, router: Router) {
        let pattern = if pattern.is_empty() { "/" } else { pattern };
        self.layers.push(Layer {
            pattern: Pattern::compile(pattern).unwrap_or_else(|e| panic!("{e}")),
            end: false,
            entries: vec![Entry {
                kind: EntryKind::Middleware,
                handler: Handler::Router(Arc::new(router)),
            }],
        });
    }

    /// Add a route handler for one method. Consecutive registrations on
    /// the same pattern share a layer, so `next_route` skips them as a
    /// group.
    pub fn method<H>(&mut self, method: Method, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        let key = MethodKey::from_method(&method)
            .unwrap_or_else(|| panic!("custom methods use all()"));
        self.push_route(pattern, EntryKind::Method(Some(key)), Handler::Fn(Arc::new(handler)));
    }

    /// Add a route handler matching every method.
    pub fn all<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.push_route(pattern, EntryKind::Method(None), Handler::Fn(Arc::new(handler)));
    }

    pub fn get<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Get, pattern, handler);
    }

    pub fn post<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Post, pattern, handler);
    }

    pub fn put<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Put, pattern, handler);
    }

    pub fn delete<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Delete, pattern, handler);
    }

    pub fn patch<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Patch, pattern, handler);
    }

    pub fn head<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Head, pattern, handler);
    }

    pub fn options<H>(&mut self, pattern: &str, handler: H)
    where
        H: Fn(&mut Request, &mut Response) -> RouteResult + Send + Sync + 'static,
    {
        self.method(Method::Options, pattern, handler);
    }

    fn push_route(&mut self, pattern: &str, kind: EntryKind, handler: Handler) {
        let pattern = if pattern.is_empty() { "/" } else { pattern };
        let entry = Entry { kind, handler };
        if let Some(last) = self.layers.last_mut() {
            if last.end && last.pattern.as_str() == pattern {
                last.entries.push(entry);
                return;
            }
        }
        self.layers.push(Layer {
            pattern: Pattern::compile(pattern).unwrap_or_else(|e| panic!("{e}")),
            end: true,
            entries: vec![entry],
        });
    }

    /// Total traversal positions in this router; equals the final
    /// cursor value of a dispatch that falls through every layer.
    pub fn count(&self) -> usize {
        self.layers.iter().map(Layer::count).sum()
    }

    /// Invoke the handlers matching `req`.
    ///
    /// The request must have been [`prepare`](Request::prepare)d. The
    /// return value is never [`RouteResult::NextRoute`];
    /// [`RouteResult::Next`] means no handler produced a response.
    pub fn dispatch(&self, req: &mut Request, res: &mut Response) -> RouteResult {
        res.begin_dispatch();
        req.reset_path_state();
        self.do_dispatch(req, res)
    }

    /// Re-enter a dispatch that returned [`RouteResult::Detach`], as
    /// though the detached handler had returned `rv`.
    ///
    /// # Panics
    ///
    /// Panics when resuming with `Detach`, or without a prior detach.
    pub fn resume(&self, req: &mut Request, res: &mut Response, rv: RouteResult) -> RouteResult {
        assert!(res.resume > 0, "resume without a prior detach");
        match rv {
            RouteResult::Send | RouteResult::Complete | RouteResult::Close => {
                res.resume = 0;
                return rv;
            }
            RouteResult::Detach => panic!("cannot resume with detach"),
            _ => {}
        }
        req.reset_path_state();
        res.pos = 0;
        res.resume_with = Some(rv);
        self.do_dispatch(req, res)
    }

    fn do_dispatch(&self, req: &mut Request, res: &mut Response) -> RouteResult {
        let rv = self.do_layers(req, res);
        debug_assert!(!matches!(rv, RouteResult::NextRoute));
        // after detach nothing may touch the traversal state; the
        // resumer may already be firing on another thread
        if let RouteResult::Next = rv {
            if let Some(e) = res.error.take() {
                // no error handler accepted it
                return RouteResult::Err(e);
            }
        }
        rv
    }

    fn do_layers(&self, req: &mut Request, res: &mut Response) -> RouteResult {
        for layer in &self.layers {
            let save;
            if res.resume > 0 {
                let n = layer.count();
                if res.pos + n < res.resume {
                    res.pos += n;
                    continue;
                }
                // repeat the match to rebuild base_path/path
                let m = layer
                    .pattern
                    .matches(req.path(), layer.end)
                    .expect("path must re-match on resume");
                save = req.adjust_path(m);
            } else {
                if layer.end && res.error.is_some() {
                    // route layers hold no error handlers
                    res.pos += layer.count();
                    continue;
                }
                let Some(m) = layer.pattern.matches(req.path(), layer.end) else {
                    res.pos += layer.count();
                    continue;
                };
                save = req.adjust_path(m);
            }

            let mut it = layer.entries.iter();
            while let Some(entry) = it.next() {
                if res.resume > 0 {
                    let n = entry.handler.count();
                    if res.pos + n < res.resume {
                        res.pos += n;
                        continue;
                    }
                } else {
                    let skip = match &entry.kind {
                        // error handlers run only in error mode, and
                        // everything else only outside it
                        EntryKind::ErrorHandler => res.error.is_none(),
                        EntryKind::Middleware => res.error.is_some(),
                        EntryKind::Method(key) => {
                            key.is_some_and(|k| !k.matches(req.method()))
                        }
                    };
                    if skip {
                        res.pos += entry.handler.count();
                        continue;
                    }
                }

                res.pos += 1;
                let rv = if res.resume > 0 && res.pos == res.resume {
                    // the detach point; act as though the handler
                    // returned the resume value
                    debug_assert_eq!(entry.handler.count(), 1);
                    res.resume = 0;
                    res.resume_with.take().expect("missing resume value")
                } else {
                    match &entry.handler {
                        Handler::Fn(f) => f(req, res),
                        Handler::Router(r) => r.do_layers(req, res),
                        Handler::Error(f) => {
                            let err = res.error.take().expect("error handler without error");
                            let rv = f(req, res, &err);
                            match &rv {
                                RouteResult::Next => res.error = Some(err),
                                RouteResult::Detach => {
                                    panic!("error handler cannot detach")
                                }
                                _ => {}
                            }
                            rv
                        }
                    }
                };

                match rv {
                    RouteResult::Detach => {
                        // return immediately with no further work, or we
                        // race with the handler's resume thread
                        return RouteResult::Detach;
                    }
                    RouteResult::Send | RouteResult::Complete | RouteResult::Close => {
                        return rv;
                    }
                    RouteResult::Next => continue,
                    RouteResult::NextRoute => {
                        assert!(layer.end, "middleware cannot return next_route");
                        for rest in it.by_ref() {
                            res.pos += rest.handler.count();
                        }
                        break;
                    }
                    RouteResult::Err(e) => {
                        res.error = Some(e);
                        if layer.end {
                            // error handlers live in middleware layers
                            for rest in it.by_ref() {
                                res.pos += rest.handler.count();
                            }
                            break;
                        }
                        continue;
                    }
                }
            }

            req.restore_path(save);
        }
        RouteResult::Next
    }
}

#[cfg(test)]
mod tests;
