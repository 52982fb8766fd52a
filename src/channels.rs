use bimap::BiMap;
use string_cache::DefaultAtom;

/**
  A channel table maps interned channel names to channel indices and back. For inputs the
  channel index is also the input register; for outputs it is the offset from the first temp
  register. A channel table is really just a convenience wrapper around a BiMap whose indices
  are dense, in declaration order.
*/
#[derive(Clone, Debug)]
pub struct ChannelTable {
  table: BiMap<DefaultAtom, usize>
}

impl ChannelTable {

  pub fn new() -> ChannelTable {
    ChannelTable{
      table: BiMap::new()
    }
  }

  pub fn len(&self) -> usize {
    self.table.len()
  }

  pub fn is_empty(&self) -> bool {
    self.table.is_empty()
  }

  pub fn index_of(&self, name: &str) -> Option<usize> {
    self.table.get_by_left(&DefaultAtom::from(name)).cloned()
  }

  pub fn name_of(&self, index: usize) -> Option<&str> {
    self.table.get_by_right(&index).map(|atom| &**atom)
  }

  /// Declares the next channel. Returns its index, or gives the name back if it is already
  /// declared.
  pub fn push(&mut self, name: &str) -> Result<usize, DefaultAtom> {
    let index = self.table.len();
    self.table
        .insert_no_overwrite(DefaultAtom::from(name), index)
        .map(|_| index)
        .map_err(|(atom, _index)| atom)
  }

  /// Channel names in index order.
  pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
    (0..self.len()).filter_map(move |index| self.name_of(index))
  }
}

impl Default for ChannelTable {
  fn default() -> Self {
    ChannelTable::new()
  }
}
