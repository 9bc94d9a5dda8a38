//! Caller customization of a send.
//!
//! A [`SendPipe`] runs once per send, after the [`SendContext`] is created and
//! before any observer or broker interaction. It may change any envelope
//! field (headers, identifiers, routing, the enqueue time) and may fail, in
//! which case nothing reaches the broker.
//!
//! ```
//! use mom_send::{configure, pipe_fn, SendContext, SendError};
//!
//! // synchronous, infallible
//! let _tagged = configure(|ctx: &mut SendContext<u32>| {
//!     ctx.set_header("tenant", "acme");
//! });
//!
//! // asynchronous, fallible
//! let _checked = pipe_fn(|ctx: &mut SendContext<u32>| {
//!     Box::pin(async move {
//!         if *ctx.payload() == 0 {
//!             return Err(SendError::Pipe("empty order".into()));
//!         }
//!         ctx.session_id = Some("orders-1".into());
//!         Ok(())
//!     })
//! });
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::{Result, SendContext};

/// Boxed, `Send` future borrowing for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Customization step applied to a send.
///
/// Implemented for `()` (no customization), [`Configure`] and [`PipeFn`].
pub trait SendPipe<T>: Send {
    /// Apply the customization to `context`.
    fn send<'a>(self, context: &'a mut SendContext<T>) -> BoxFuture<'a, Result<()>>
    where
        Self: 'a;
}

impl<T: Send> SendPipe<T> for () {
    fn send<'a>(self, _context: &'a mut SendContext<T>) -> BoxFuture<'a, Result<()>>
    where
        Self: 'a,
    {
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Pipe running a synchronous closure. See [`configure`].
pub struct Configure<T, F> {
    apply: F,
    _payload: PhantomData<fn(&mut SendContext<T>)>,
}

/// Pipe from a synchronous, infallible closure.
pub fn configure<T, F>(apply: F) -> Configure<T, F>
where
    F: FnOnce(&mut SendContext<T>) + Send,
{
    Configure {
        apply,
        _payload: PhantomData,
    }
}

impl<T, F> SendPipe<T> for Configure<T, F>
where
    T: Send,
    F: FnOnce(&mut SendContext<T>) + Send,
{
    fn send<'a>(self, context: &'a mut SendContext<T>) -> BoxFuture<'a, Result<()>>
    where
        Self: 'a,
    {
        (self.apply)(context);
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Pipe running an asynchronous closure. See [`pipe_fn`].
pub struct PipeFn<T, F> {
    run: F,
    _payload: PhantomData<fn(&mut SendContext<T>)>,
}

/// Pipe from an asynchronous, fallible closure returning a [`BoxFuture`].
pub fn pipe_fn<T, F>(run: F) -> PipeFn<T, F>
where
    F: for<'a> FnOnce(&'a mut SendContext<T>) -> BoxFuture<'a, Result<()>> + Send,
{
    PipeFn {
        run,
        _payload: PhantomData,
    }
}

impl<T, F> SendPipe<T> for PipeFn<T, F>
where
    T: Send,
    F: for<'a> FnOnce(&'a mut SendContext<T>) -> BoxFuture<'a, Result<()>> + Send,
{
    fn send<'a>(self, context: &'a mut SendContext<T>) -> BoxFuture<'a, Result<()>>
    where
        Self: 'a,
    {
        (self.run)(context)
    }
}
