use stratus_engine::HandlerError;
use stratus_engine::error::format_err_chain;

/// Wrap an SDK failure the caller has already ruled out as not-found or
/// conflict. `SdkError`'s own Display is just "service error", so the whole
/// source chain goes into the message.
pub(crate) fn remote<E>(operation: &str, err: &E) -> HandlerError
where
    E: std::error::Error,
{
    HandlerError::Remote(format!("{operation} failed: {}", format_err_chain(err)))
}

pub(crate) fn build(what: &str, err: &aws_smithy_types::error::operation::BuildError) -> HandlerError {
    HandlerError::Remote(format!("invalid {what}: {err}"))
}
