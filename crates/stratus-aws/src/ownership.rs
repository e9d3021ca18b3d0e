//! Owner tagging.
//!
//! Everything stratus creates carries an owner tag. When a create collides
//! with an existing object, the tag is what tells "we made this on an
//! earlier, interrupted run" apart from "someone else's object with the
//! same name".

/// Tag key recording which owner created an object.
pub const OWNER_TAG: &str = "stratus:owner";

/// True if `tags` carry `OWNER_TAG` with value `owner`.
///
/// Values are optional because some services allow valueless tags.
pub fn owned_by<'t, I>(tags: I, owner: &str) -> bool
where
    I: IntoIterator<Item = (&'t str, Option<&'t str>)>,
{
    tags.into_iter()
        .any(|(key, value)| key == OWNER_TAG && value == Some(owner))
}
