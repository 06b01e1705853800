//! Context Channels
//!
//! A channel is a typed slot an instance can publish into for its subtree.
//! Descendants resolve the nearest ancestor that published the channel,
//! without the value being threaded through props.
//!
//! Resolution order:
//!
//! 1. The nearest ancestor that called `provide` for the channel.
//! 2. The default registered when the channel was created.
//! 3. Otherwise `MissingProviderError`.

use std::any::Any;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique channel IDs.
static CHANNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    fn next() -> Self {
        Self(CHANNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// A typed context channel.
///
/// # Example
///
/// ```rust,ignore
/// let theme = Channel::with_default("theme", Theme::Light);
///
/// // in a parent render
/// scope.provide(&theme, Theme::Dark);
///
/// // in a descendant render
/// let current = scope.use_context(&theme)?;
/// ```
pub struct Channel<T> {
    id: ChannelId,
    name: &'static str,
    default: Option<Rc<T>>,
}

impl<T: 'static> Channel<T> {
    /// A channel without a default: resolving it outside a provider fails.
    pub fn new(name: &'static str) -> Self {
        Self {
            id: ChannelId::next(),
            name,
            default: None,
        }
    }

    pub fn with_default(name: &'static str, default: T) -> Self {
        Self {
            id: ChannelId::next(),
            name,
            default: Some(Rc::new(default)),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_value(&self) -> Option<&T> {
        self.default.as_deref()
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            default: self.default.clone(),
        }
    }
}

impl<T> PartialEq for Channel<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Channel<T> {}

impl<T> Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// A value an instance currently publishes.
pub struct Provided {
    pub value: Rc<dyn Any>,
    /// Bumped whenever the published value changes.
    pub version: u64,
}

impl Provided {
    pub fn new(value: Rc<dyn Any>) -> Self {
        Self { value, version: 0 }
    }

    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

impl Debug for Provided {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provided")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_unique() {
        let a = Channel::<i32>::new("a");
        let b = Channel::<i32>::new("b");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn default_is_optional() {
        let user = Channel::<String>::new("user");
        let theme = Channel::with_default("theme", "light");

        assert!(user.default_value().is_none());
        assert_eq!(theme.default_value(), Some(&"light"));
        assert_eq!(theme.name(), "theme");
    }

    #[test]
    fn provided_values_downcast_by_type() {
        let provided = Provided::new(Rc::new(7_u32));
        assert_eq!(provided.downcast::<u32>(), Some(&7));
        assert!(provided.downcast::<i64>().is_none());
    }
}
