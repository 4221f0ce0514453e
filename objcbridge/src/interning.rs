use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

use crate::Sel;

pub struct SelectorTableImpl {
    table: HashMap<Sel, Arc<str>>,
    mappings: HashMap<Arc<str>, Sel>,
}

/// Registered message names. A name always maps to the same selector.
#[derive(Clone)]
pub struct SelectorTable(Arc<RwLock<SelectorTableImpl>>);

impl SelectorTableImpl {
    fn new() -> Self {
        Self {
            table: HashMap::new(),
            mappings: HashMap::new(),
        }
    }

    fn find(&self, name: &str) -> Option<Sel> {
        self.mappings.get(name).copied()
    }

    fn get_or_add(&mut self, name: &str) -> Sel {
        if let Some(selector) = self.find(name) {
            return selector;
        }
        // zero stays free for the nil selector
        let selector = Sel::from_addr(self.table.len() + 1);
        let interned = Arc::<str>::from(name);
        self.mappings.insert(interned.clone(), selector);
        self.table.insert(selector, interned);
        selector
    }

    fn get(&self, selector: Sel) -> Option<Arc<str>> {
        self.table.get(&selector).cloned()
    }
}

impl SelectorTable {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(SelectorTableImpl::new())))
    }

    pub fn add(&self, name: &str) -> Sel {
        if let Some(selector) = self.0.read().find(name) {
            return selector;
        }
        self.0.write().get_or_add(name)
    }

    pub fn get(&self, selector: Sel) -> Option<Arc<str>> {
        self.0.read().get(selector)
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SelectorTable {
    fn default() -> Self {
        Self::new()
    }
}
