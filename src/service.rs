//! Server-side service dispatch.
//!
//! Rust has no runtime reflection over method signatures, so "introspect
//! user types" (spec.md §4.2) is realized as a build-time reflection pass:
//! the [`impl_service!`] macro. A user writes ordinary methods shaped
//! `(&self, Arg, &mut Reply) -> Result<(), RpcError>` and invokes the macro
//! once to generate a [`Service`] impl whose `call` matches on method name,
//! decodes `Arg`, default-constructs `Reply`, and re-encodes whatever comes
//! back. The call-count atomic counters named in the spec's `MethodType`
//! live on the server's registration record, not on the user's struct —
//! user services carry no dispatch bookkeeping of their own.

use crate::codec::CodecType;
use crate::error::RpcError;
use async_trait::async_trait;

/// A registered, callable unit. Implemented by hand (rare) or, in the
/// common case, generated by [`impl_service!`].
#[async_trait]
pub trait Service: Send + Sync {
    /// The service name under which methods are addressed as
    /// `"Name.method"`. Must be a valid identifier.
    fn name(&self) -> &'static str;

    /// Every method name this service exposes, used by the server to seed
    /// one call counter per method at registration time.
    fn method_names(&self) -> &'static [&'static str];

    /// Decodes `arg_bytes` (encoded per `codec_type`) into the method's
    /// argument type, invokes the method, and re-encodes the reply (or
    /// surfaces the method's error) into the same codec.
    async fn call(
        &self,
        method: &str,
        codec_type: CodecType,
        arg_bytes: &[u8],
    ) -> Result<Box<dyn erased_serde::Serialize + Send + Sync>, RpcError>;
}

/// Generates a [`Service`] impl for `$ty` dispatching the named methods.
///
/// ```ignore
/// struct Arith;
/// impl Arith {
///     fn sum(&self, args: SumArgs, reply: &mut i64) -> Result<(), RpcError> {
///         *reply = args.a + args.b;
///         Ok(())
///     }
/// }
/// impl_service!(Arith, "Arith", { "sum" => sum: SumArgs => i64 });
/// ```
#[macro_export]
macro_rules! impl_service {
    ($ty:ty, $name:expr, { $($method:literal => $ident:ident : $arg:ty => $reply:ty),* $(,)? }) => {
        #[$crate::async_trait::async_trait]
        impl $crate::service::Service for $ty {
            fn name(&self) -> &'static str {
                $name
            }

            fn method_names(&self) -> &'static [&'static str] {
                &[$($method),*]
            }

            async fn call(
                &self,
                method: &str,
                codec_type: $crate::codec::CodecType,
                arg_bytes: &[u8],
            ) -> Result<Box<dyn $crate::erased_serde::Serialize + Send + Sync>, $crate::error::RpcError> {
                match method {
                    $(
                        $method => {
                            let args: $arg = $crate::codec::decode_body(codec_type, arg_bytes)
                                .map_err(|e| $crate::error::RpcError::InvalidArgs(e.to_string()))?;
                            let mut reply: $reply = ::std::default::Default::default();
                            self.$ident(args, &mut reply)
                                .map_err(|e| $crate::error::RpcError::Application(e.to_string()))?;
                            Ok(Box::new(reply))
                        }
                    )*
                    other => Err($crate::error::RpcError::MethodNotFound(other.to_string())),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodecType;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, Default)]
    struct Args {
        a: i64,
        b: i64,
    }

    struct Arith;

    impl Arith {
        fn sum(&self, args: Args, reply: &mut i64) -> Result<(), String> {
            *reply = args.a + args.b;
            Ok(())
        }

        fn fail(&self, _args: Args, _reply: &mut i64) -> Result<(), String> {
            Err("always fails".into())
        }
    }

    impl_service!(Arith, "Arith", {
        "sum" => sum: Args => i64,
        "fail" => fail: Args => i64,
    });

    #[async_std::test]
    async fn dispatches_to_the_right_method_and_encodes_the_reply() {
        let svc = Arith;
        let bytes = serde_json::to_vec(&Args { a: 3, b: 4 }).unwrap();
        let reply = svc.call("sum", CodecType::Json, &bytes).await.unwrap();
        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::new(&mut buf);
        erased_serde::serialize(&*reply, &mut ser).unwrap();
        assert_eq!(buf, b"7");
    }

    #[async_std::test]
    async fn unknown_method_is_method_not_found() {
        let svc = Arith;
        let bytes = serde_json::to_vec(&Args { a: 1, b: 1 }).unwrap();
        let err = svc.call("sub", CodecType::Json, &bytes).await.unwrap_err();
        assert_eq!(err, RpcError::MethodNotFound("sub".into()));
    }

    #[async_std::test]
    async fn application_error_surfaces_verbatim() {
        let svc = Arith;
        let bytes = serde_json::to_vec(&Args { a: 1, b: 1 }).unwrap();
        let err = svc.call("fail", CodecType::Json, &bytes).await.unwrap_err();
        assert_eq!(err, RpcError::Application("always fails".into()));
    }
}
