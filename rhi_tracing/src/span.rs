#[doc(hidden)]
pub use tracing;

/// Opens a [`Span`] named `name` for a hot path of the RHI.
///
/// The span is only recorded with the `spans` feature. Otherwise the macro expands to a
/// zero-sized [`Span`] and entering it does nothing.
#[macro_export]
macro_rules! trace_span {
    ($name:expr) => {
        $crate::__trace_span_impl!($name)
    };
}

#[cfg(feature = "spans")]
#[macro_export]
#[doc(hidden)]
macro_rules! __trace_span_impl {
    ($name:expr) => {{
        $crate::span::Span {
            inner: $crate::span::tracing::span!($crate::span::tracing::Level::TRACE, $name),
            _priv: (),
        }
    }};
}

#[cfg(not(feature = "spans"))]
#[macro_export]
#[doc(hidden)]
macro_rules! __trace_span_impl {
    ($name:expr) => {{
        $crate::span::Span { _priv: () }
    }};
}

/// A named region of work, such as a queue submission or a barrier flush.
///
/// Created by [`trace_span!`]. Fields are public only for the macro.
#[derive(Clone, Debug)]
pub struct Span {
    #[cfg(feature = "spans")]
    #[doc(hidden)]
    pub inner: tracing::span::Span,
    #[doc(hidden)]
    pub _priv: (),
}

impl Span {
    /// Enters the span until the returned guard is dropped.
    pub fn entered(self) -> EnteredSpan {
        EnteredSpan {
            #[cfg(feature = "spans")]
            _inner: self.inner.entered(),
        }
    }

    /// Runs `f` inside the span.
    pub fn in_scope<F, T>(self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _guard = self.entered();
        f()
    }
}

/// Guard of an entered [`Span`]. The span is exited on drop.
#[derive(Debug)]
#[non_exhaustive]
pub struct EnteredSpan {
    #[cfg(feature = "spans")]
    _inner: tracing::span::EnteredSpan,
}
