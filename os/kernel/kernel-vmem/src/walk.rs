//! # Lazy Table Walk
//!
//! Depth-first traversal over the present entries of a table tree. The walk
//! is bounded by the four paging levels and keeps one cursor per level, so it
//! needs no allocation and no recursion.

use crate::{PageTable, PageTableEntry, PhysMapper, TableLevel, virtual_address_from_indices};
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// One present entry encountered during a [`Walk`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TableVisit {
    pub level: TableLevel,
    pub index: usize,
    pub entry: PageTableEntry,
    /// First virtual address translated through this entry.
    pub virtual_address: VirtualAddress,
}

impl TableVisit {
    /// Whether the entry maps memory rather than linking to a table.
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.entry.is_leaf(self.level)
    }
}

#[derive(Copy, Clone)]
struct Cursor {
    table: PhysicalPage<Size4K>,
    next: usize,
}

/// Iterator returned by [`PageMap::walk`](crate::PageMap::walk).
///
/// A non-leaf entry is yielded before the entries of the table it links to.
pub struct Walk<'m, M: PhysMapper> {
    mapper: &'m M,
    cursors: [Cursor; 4],
    indices: [usize; 4],
    depth: usize,
}

impl<'m, M: PhysMapper> Walk<'m, M> {
    pub(crate) const fn new(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        let cursor = Cursor { table: root, next: 0 };
        Self {
            mapper,
            cursors: [cursor; 4],
            indices: [0; 4],
            depth: 1,
        }
    }

    fn entry_at(&self, table: PhysicalPage<Size4K>, index: usize) -> PageTableEntry {
        // SAFETY: `Walk` is only created from a `PageMap`, whose constructor
        // guarantees the tree is reachable through the mapper.
        let table = unsafe { self.mapper.phys_to_mut::<PageTable>(table.base()) };
        table.get(index)
    }
}

impl<M: PhysMapper> Iterator for Walk<'_, M> {
    type Item = TableVisit;

    fn next(&mut self) -> Option<Self::Item> {
        while self.depth > 0 {
            let d = self.depth - 1;
            let cursor = self.cursors[d];
            if cursor.next >= crate::ENTRIES_PER_TABLE {
                self.depth -= 1;
                continue;
            }
            self.cursors[d].next += 1;

            let index = cursor.next;
            let entry = self.entry_at(cursor.table, index);
            if !entry.present() {
                continue;
            }

            let level = TableLevel::ALL[d];
            self.indices[d] = index;
            self.indices[d + 1..].fill(0);
            let [l4, l3, l2, l1] = self.indices;
            let visit = TableVisit {
                level,
                index,
                entry,
                virtual_address: virtual_address_from_indices(l4, l3, l2, l1),
            };

            if let Some(child) = entry.next_table(level) {
                self.cursors[d + 1] = Cursor { table: child, next: 0 };
                self.depth += 1;
            }
            return Some(visit);
        }
        None
    }
}
