use crate::bstr::Bstr;

/// Insertion-ordered multimap with case-insensitive key lookup. Headers are
/// stored here: lookups find the first matching name, iteration walks the
/// wire order, and repeated names coexist as separate entries.
#[derive(Clone, Debug, Default)]
pub struct Table<T> {
    elements: Vec<(Bstr, T)>,
}

impl<T> Table<T> {
    pub fn with_capacity(size: usize) -> Self {
        Self {
            elements: Vec::with_capacity(size),
        }
    }

    pub fn size(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Appends a new entry; existing entries with the same key are kept.
    pub fn add(&mut self, key: Bstr, item: T) {
        self.elements.push((key, item));
    }

    pub fn get_index(&self, idx: usize) -> Option<&(Bstr, T)> {
        self.elements.get(idx)
    }

    /// First entry whose key case-blindly equals `key`.
    pub fn get_nocase(&self, key: impl AsRef<[u8]>) -> Option<&(Bstr, T)> {
        let key = key.as_ref();
        self.elements.iter().find(|(k, _)| k.eq_nocase(key))
    }

    pub fn get_nocase_mut(&mut self, key: impl AsRef<[u8]>) -> Option<&mut (Bstr, T)> {
        let key = key.as_ref();
        self.elements.iter_mut().find(|(k, _)| k.eq_nocase(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Bstr, T)> {
        self.elements.iter()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_and_lookup() {
        let mut t = Table::with_capacity(2);
        t.add(Bstr::from("Host"), 1);
        t.add(Bstr::from("Cookie"), 2);
        t.add(Bstr::from("host"), 3);
        assert_eq!(t.size(), 3);
        assert_eq!(t.get_nocase("HOST").map(|(_, v)| *v), Some(1));
        assert_eq!(t.get_index(1).map(|(_, v)| *v), Some(2));
        assert!(t.get_nocase("absent").is_none());
    }
}
