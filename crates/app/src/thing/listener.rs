//! Change listeners and the per-thing registry that stores them.
//!
//! Registration is keyed by listener identity (the `Arc` allocation), so
//! registering the same listener twice is a no-op and a single unregister
//! removes it.

use std::sync::{Arc, Mutex, PoisonError};

use thingmesh_domain::section::Section;
use thingmesh_domain::value::{Value, ValueMap};

use crate::thing::Thing;

/// Notified when one property of a thing changes.
pub trait PropertyListener: Send + Sync {
    fn on_property_changed(&self, thing: &Thing, key: &str, value: Option<&Value>);
}

/// Notified with the whole section after any of its properties changes.
pub trait SectionListener: Send + Sync {
    fn on_section_changed(&self, thing: &Thing, section: Section, values: &ValueMap);
}

/// Notified when children of a given trait appear or disappear.
pub trait ChildListener: Send + Sync {
    fn on_child_added(&self, parent: &Thing, trait_id: &str, child: &Thing);
    fn on_child_removed(&self, parent: &Thing, trait_id: &str, child: &Thing);
}

impl<F> PropertyListener for F
where
    F: Fn(&Thing, &str, Option<&Value>) + Send + Sync,
{
    fn on_property_changed(&self, thing: &Thing, key: &str, value: Option<&Value>) {
        self(thing, key, value);
    }
}

impl<F> SectionListener for F
where
    F: Fn(&Thing, Section, &ValueMap) + Send + Sync,
{
    fn on_section_changed(&self, thing: &Thing, section: Section, values: &ValueMap) {
        self(thing, section, values);
    }
}

type Entries<K, L> = Mutex<Vec<(K, Arc<L>)>>;

fn same<L: ?Sized>(left: &Arc<L>, right: &Arc<L>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

fn insert<K: PartialEq, L: ?Sized>(entries: &Entries<K, L>, key: K, listener: Arc<L>) -> bool {
    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
    if entries
        .iter()
        .any(|(existing, registered)| *existing == key && same(registered, &listener))
    {
        return false;
    }
    entries.push((key, listener));
    true
}

fn remove<K, L: ?Sized>(
    entries: &Entries<K, L>,
    listener: &Arc<L>,
    matches: impl Fn(&K) -> bool,
) -> bool {
    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
    let before = entries.len();
    entries.retain(|(key, registered)| !(matches(key) && same(registered, listener)));
    entries.len() != before
}

fn select<K, L: ?Sized>(entries: &Entries<K, L>, matches: impl Fn(&K) -> bool) -> Vec<Arc<L>> {
    entries
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|(key, _)| matches(key))
        .map(|(_, listener)| Arc::clone(listener))
        .collect()
}

/// Listeners attached to one thing.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    properties: Entries<String, dyn PropertyListener>,
    sections: Entries<Section, dyn SectionListener>,
    children: Entries<String, dyn ChildListener>,
}

impl ListenerRegistry {
    pub(crate) fn register_property(&self, key: &str, listener: Arc<dyn PropertyListener>) -> bool {
        insert(&self.properties, key.to_string(), listener)
    }

    pub(crate) fn unregister_property(&self, key: &str, listener: &Arc<dyn PropertyListener>) -> bool {
        remove(&self.properties, listener, |registered| registered == key)
    }

    pub(crate) fn register_section(&self, section: Section, listener: Arc<dyn SectionListener>) -> bool {
        insert(&self.sections, section, listener)
    }

    /// Drop `listener` from every section it was registered for.
    pub(crate) fn unregister_section(&self, listener: &Arc<dyn SectionListener>) -> bool {
        remove(&self.sections, listener, |_| true)
    }

    pub(crate) fn register_child(&self, trait_id: &str, listener: Arc<dyn ChildListener>) -> bool {
        insert(&self.children, trait_id.to_string(), listener)
    }

    pub(crate) fn unregister_child(&self, trait_id: &str, listener: &Arc<dyn ChildListener>) -> bool {
        remove(&self.children, listener, |registered| registered == trait_id)
    }

    pub(crate) fn property_listeners(&self, key: &str) -> Vec<Arc<dyn PropertyListener>> {
        select(&self.properties, |registered| registered == key)
    }

    pub(crate) fn section_listeners(&self, section: Section) -> Vec<Arc<dyn SectionListener>> {
        select(&self.sections, |registered| *registered == section)
    }

    pub(crate) fn child_listeners(&self, trait_id: &str) -> Vec<Arc<dyn ChildListener>> {
        select(&self.children, |registered| registered == trait_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl PropertyListener for Noop {
        fn on_property_changed(&self, _: &Thing, _: &str, _: Option<&Value>) {}
    }

    #[test]
    fn should_ignore_duplicate_registration() {
        let registry = ListenerRegistry::default();
        let listener: Arc<dyn PropertyListener> = Arc::new(Noop);
        assert!(registry.register_property("s/onof/v", Arc::clone(&listener)));
        assert!(!registry.register_property("s/onof/v", Arc::clone(&listener)));
        assert_eq!(registry.property_listeners("s/onof/v").len(), 1);
    }

    #[test]
    fn should_remove_listener_when_unregistered_once() {
        let registry = ListenerRegistry::default();
        let listener: Arc<dyn PropertyListener> = Arc::new(Noop);
        registry.register_property("s/onof/v", Arc::clone(&listener));
        registry.register_property("s/onof/v", Arc::clone(&listener));
        assert!(registry.unregister_property("s/onof/v", &listener));
        assert!(registry.property_listeners("s/onof/v").is_empty());
        assert!(!registry.unregister_property("s/onof/v", &listener));
    }

    #[test]
    fn should_keep_distinct_listeners_apart() {
        let registry = ListenerRegistry::default();
        let first: Arc<dyn PropertyListener> = Arc::new(Noop);
        let second: Arc<dyn PropertyListener> = Arc::new(Noop);
        registry.register_property("s/levl/v", Arc::clone(&first));
        registry.register_property("s/levl/v", Arc::clone(&second));
        registry.register_property("s/onof/v", Arc::clone(&first));
        assert_eq!(registry.property_listeners("s/levl/v").len(), 2);
        registry.unregister_property("s/levl/v", &first);
        assert_eq!(registry.property_listeners("s/levl/v").len(), 1);
        assert_eq!(registry.property_listeners("s/onof/v").len(), 1);
    }
}
