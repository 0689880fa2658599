// src/core/rmi/mod.rs

//! Remote method invocation on top of typed message dispatch.

pub mod blocking;
pub mod errors;
pub mod messages;
pub mod objects;
pub mod proxy;

pub use blocking::{PendingCall, RemoteAccessBlockRegistration, ResponseSlot, WaitOutcome};
pub use errors::RemoteError;
pub use messages::{RemoteAccessRequest, RemoteAccessResponse, RemoteFailure, RemoteFailureKind};
pub use objects::{
    RemoteInterface, RemoteObjectRegistration, decode_argument, encode_argument, encode_result,
    method_not_found,
};
pub use proxy::{Exemptions, Fallback, RemoteObjectFactory, RemoteProxy};
pub use serde_json::Value;

/// Declares a trait that can be exposed to, and called by, a remote peer.
///
/// Every method takes `&self` and serializable arguments and returns
/// `Result<R, RemoteError>`. The macro generates the trait itself, a
/// `RemoteInterface` implementation for `dyn Trait` (used by
/// `RemoteObjectRegistration`) and an implementation of the trait for
/// `RemoteProxy<dyn Trait>` (used by `RemoteObjectFactory`).
///
/// ```ignore
/// remote_interface! {
///     pub trait Echo {
///         fn concat(&self, input: String) -> String;
///     }
/// }
/// ```
#[macro_export]
macro_rules! remote_interface {
    (
        $(#[$meta:meta])*
        $vis:vis trait $name:ident {
            $(
                $(#[$method_meta:meta])*
                fn $method:ident(&self $(, $arg:ident : $ty:ty)* $(,)?) -> $ret:ty;
            )*
        }
    ) => {
        $(#[$meta])*
        $vis trait $name: Send + Sync {
            $(
                $(#[$method_meta])*
                fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$ret, $crate::core::rmi::RemoteError>;
            )*
        }

        impl $crate::core::rmi::RemoteInterface for dyn $name {
            const NAME: &'static str = concat!(module_path!(), "::", stringify!($name));

            #[allow(unused_mut, unused_variables, unused_assignments)]
            fn dispatch(
                target: &Self,
                method: &str,
                args: ::std::vec::Vec<$crate::core::rmi::Value>,
            ) -> ::std::result::Result<$crate::core::rmi::Value, $crate::core::rmi::RemoteFailure> {
                let mut args = args.into_iter();
                match method {
                    $(
                        stringify!($method) => {
                            let mut index = 0usize;
                            $(
                                let $arg: $ty = $crate::core::rmi::decode_argument(
                                    stringify!($method),
                                    &mut args,
                                    index,
                                )?;
                                index += 1;
                            )*
                            $crate::core::rmi::encode_result(target.$method($($arg),*))
                        }
                    )*
                    other => Err($crate::core::rmi::method_not_found(
                        <dyn $name as $crate::core::rmi::RemoteInterface>::NAME,
                        other,
                    )),
                }
            }
        }

        impl $name for $crate::core::rmi::RemoteProxy<dyn $name> {
            $(
                fn $method(&self $(, $arg: $ty)*)
                    -> ::std::result::Result<$ret, $crate::core::rmi::RemoteError>
                {
                    let args: ::std::vec::Vec<$crate::core::rmi::Value> =
                        vec![$($crate::core::rmi::encode_argument(&$arg)?),*];
                    self.invoke(stringify!($method), args, move |fallback| fallback.$method($($arg),*))
                }
            )*
        }
    };
}
