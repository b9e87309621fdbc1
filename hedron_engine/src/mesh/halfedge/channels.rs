// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slotmap::{Key, SecondaryMap};

/// Types that can be used as a channel key. These are the mesh element ids.
pub trait ChannelKey: Key {}
impl<T: Key> ChannelKey for T {}

/// Types that can be stored in a mesh channel.
pub trait ChannelValue: Clone + Copy + Default + Sized {}
impl<T: Clone + Copy + Default> ChannelValue for T {}

/// A channel attaches arbitrary data to mesh elements. Channel storage is
/// sparse: elements never written to read back the channel's default value.
#[derive(Debug, Clone, Default)]
pub struct Channel<K: ChannelKey, V: ChannelValue> {
    inner: SecondaryMap<K, V>,
    default: V,
}

impl<K: ChannelKey, V: ChannelValue> Channel<K, V> {
    pub fn new() -> Self {
        Self {
            inner: SecondaryMap::new(),
            default: V::default(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.inner.iter()
    }

    pub fn get(&self, key: K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn remove(&mut self, key: K) -> Option<V> {
        self.inner.remove(key)
    }
}

impl<K: ChannelKey, V: ChannelValue> std::ops::Index<K> for Channel<K, V> {
    type Output = V;

    fn index(&self, index: K) -> &Self::Output {
        // Will return the default value for never-accessed keys.
        self.inner.get(index).unwrap_or(&self.default)
    }
}

impl<K: ChannelKey, V: ChannelValue> std::ops::IndexMut<K> for Channel<K, V> {
    fn index_mut(&mut self, index: K) -> &mut Self::Output {
        self.inner
            .entry(index)
            // From the `entry` documentation in slotmap: May return None if the
            // key was removed from the originating slot map.
            .expect("Error indexing channel. Key was removed from the originating slotmap.")
            // Will insert the default value for never-accessed keys.
            .or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    slotmap::new_key_type! { struct TestKey; }

    #[test]
    fn test_channel_access() {
        let mut keys: SlotMap<TestKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());

        let mut channel = Channel::<TestKey, i32>::new();
        channel[a] = 1;
        channel[b] = 2;

        assert_eq!(channel.get(a), Some(&1));
        assert_eq!(channel.get(c), None);
        // Never-written keys read back the default.
        assert_eq!(channel[c], 0);

        let mut values: Vec<i32> = channel.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);

        assert_eq!(channel.remove(a), Some(1));
        assert_eq!(channel.get(a), None);
        assert_eq!(channel[a], 0);
    }
}
