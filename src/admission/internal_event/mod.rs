//! Structured log lines and metrics emitted by the admission controller.
//!
//! One-off events implement [`InternalEvent`] and are fired with `emit(Event { .. })`. Events on
//! hot paths are declared with `registered_event!`: their metric handles are resolved once by
//! [`register`] and the returned handle is kept by the caller. Handles bind to the `metrics`
//! recorder installed when they are registered; with none installed, values are dropped.

mod admission;

pub use admission::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

/// An event whose metric handles are resolved up front.
pub trait RegisterInternalEvent: Sized {
    type Handle;

    fn register(self) -> Self::Handle;
}

pub fn register<E: RegisterInternalEvent>(event: E) -> E::Handle {
    event.register()
}

/// Declares a registered event `$event` and its `${event}Handle`.
///
/// The handle holds one field per listed metric, initialized at registration, and exposes the
/// given `emit` method.
macro_rules! registered_event {
    (
        $event:ident => {
            $($field:ident: $type:ty = $value:expr,)*
        }

        fn emit(&$slf:ident $(, $arg:ident: $arg_type:ty)* $(,)?) $emit_body:block
    ) => {
        paste::paste! {
            #[derive(Clone, Copy, Debug, Default)]
            pub struct $event;

            #[derive(Clone, Debug)]
            pub struct [<$event Handle>] {
                $($field: $type,)*
            }

            impl $crate::admission::internal_event::RegisterInternalEvent for $event {
                type Handle = [<$event Handle>];

                fn register(self) -> Self::Handle {
                    [<$event Handle>] {
                        $($field: $value,)*
                    }
                }
            }

            impl [<$event Handle>] {
                pub fn emit(&$slf $(, $arg: $arg_type)*) $emit_body
            }
        }
    };
}

pub(crate) use registered_event;
