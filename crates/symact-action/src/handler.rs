use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use symact_frame::{status, EncodedPacket, FrameError, InboundPacket, ResponseHeader};
use tracing::error;

use crate::action::{Action, ExecutionContext};
use crate::context::SessionContext;

/// Type-erased entry point for one action.
pub trait ActionHandler<C: ExecutionContext>: Send + Sync {
    fn identifier(&self) -> &'static str;

    /// Decode the parameters from `packet`, run the action, and encode the
    /// response stamped with `command_token`.
    ///
    /// A failing or panicking action yields a response with a nonzero status.
    /// Parameters that cannot be decoded yield `Err`: the request was malformed.
    fn execute(
        &self,
        ctx: &C,
        stx: &mut SessionContext<C::Session>,
        command_token: u32,
        packet: InboundPacket,
    ) -> Result<EncodedPacket, FrameError>;
}

/// Adapter from a typed [`Action`] to [`ActionHandler`].
pub(crate) struct TypedHandler<A>(PhantomData<fn() -> A>);

impl<A> TypedHandler<A> {
    pub(crate) fn new() -> Self {
        Self(PhantomData)
    }
}

impl<C, A> ActionHandler<C> for TypedHandler<A>
where
    C: ExecutionContext,
    A: Action<C>,
{
    fn identifier(&self) -> &'static str {
        A::IDENTIFIER
    }

    fn execute(
        &self,
        ctx: &C,
        stx: &mut SessionContext<C::Session>,
        command_token: u32,
        packet: InboundPacket,
    ) -> Result<EncodedPacket, FrameError> {
        let params = packet.consume_payload::<A::Params>()?;

        let outcome = catch_unwind(AssertUnwindSafe(|| A::execute(ctx, stx, params)));
        match outcome {
            Ok(Ok(response)) => EncodedPacket::new(
                &ResponseHeader {
                    command_token,
                    status: status::SUCCESS,
                },
                &response,
            ),
            Ok(Err(err)) => {
                error!(
                    action = A::IDENTIFIER,
                    session_id = stx.session_id(),
                    token = command_token,
                    status = err.status(),
                    error = %err.message,
                    "action failed"
                );
                stx.record_error();
                EncodedPacket::status_only(command_token, err.status())
            }
            Err(panic) => {
                error!(
                    action = A::IDENTIFIER,
                    session_id = stx.session_id(),
                    token = command_token,
                    panic = panic_message(panic.as_ref()),
                    "action panicked"
                );
                stx.record_error();
                EncodedPacket::status_only(command_token, status::FAILURE)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
