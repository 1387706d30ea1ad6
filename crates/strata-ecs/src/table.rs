//! Columnar table storage.
//!
//! A [`Table`] holds the rows for every archetype whose *data-bearing*
//! component set is identical; archetypes that differ only by tags share one
//! table. Each data component gets one [`Column`]: a type-erased, manually
//! managed byte buffer with an explicit element stride and alignment.
//!
//! # Safety
//!
//! This is the crate's only module with `unsafe` code. A `Column` never
//! interprets its bytes; it only copies them. Typed access goes through
//! [`Column::as_slice`]/[`Column::as_slice_mut`], which assert that the
//! requested type's size and alignment match the column's layout before
//! casting, and component payloads are restricted to `Copy + 'static` types
//! at the public boundary, so no destructors ever need to run.

use crate::component::{cmp_ids, ids_match, ComponentInfo};
use crate::entity::EntityId;

use std::alloc::{self, Layout};
use std::ptr;

/// Identifies a table within the world's table arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub(crate) u32);

// ---------------------------------------------------------------------------
// Raw byte views over component values
// ---------------------------------------------------------------------------

/// View a component value as its raw bytes.
pub(crate) fn bytes_of<T: Copy + 'static>(value: &T) -> &[u8] {
    // Safety: T is Copy (no padding-sensitive invariants are carried across;
    // the bytes are only ever memcpy'd back into a slot of the same type).
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, std::mem::size_of::<T>()) }
}

/// Reassemble a component value from staged bytes. The source buffer need
/// not be aligned.
pub(crate) fn value_from_bytes<T: Copy + 'static>(bytes: &[u8]) -> T {
    assert_eq!(
        bytes.len(),
        std::mem::size_of::<T>(),
        "staged byte length does not match component size"
    );
    // Safety: length checked above; read_unaligned tolerates the Vec<u8>
    // backing having alignment 1.
    unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

// ---------------------------------------------------------------------------
// Column
// ---------------------------------------------------------------------------

/// A type-erased, densely packed buffer of fixed-stride elements.
pub(crate) struct Column {
    /// Heap allocation; null while capacity is 0.
    data: *mut u8,
    capacity: usize,
    item_size: usize,
    item_align: usize,
}

// A Column stores plain bytes for Copy payloads; nothing thread-affine.
unsafe impl Send for Column {}
unsafe impl Sync for Column {}

impl Column {
    fn new(info: &ComponentInfo) -> Self {
        debug_assert!(info.size > 0, "tags never get a column");
        Self {
            data: ptr::null_mut(),
            capacity: 0,
            item_size: info.size,
            item_align: info.align,
        }
    }

    fn layout_for(&self, capacity: usize) -> Layout {
        Layout::from_size_align(self.item_size * capacity, self.item_align)
            .expect("column layout overflow")
    }

    /// Grow to `new_capacity`, copying the live bytes across.
    fn grow(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity);
        let new_layout = self.layout_for(new_capacity);
        unsafe {
            let new_data = if self.capacity == 0 {
                alloc::alloc(new_layout)
            } else {
                alloc::realloc(self.data, self.layout_for(self.capacity), new_layout.size())
            };
            assert!(!new_data.is_null(), "column allocation failed");
            self.data = new_data;
        }
        self.capacity = new_capacity;
    }

    #[inline]
    fn ptr_at(&self, row: usize) -> *mut u8 {
        debug_assert!(row < self.capacity);
        unsafe { self.data.add(row * self.item_size) }
    }

    /// Copy the bytes of `from` over `to` within this column.
    fn copy_row_within(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        unsafe {
            ptr::copy_nonoverlapping(self.ptr_at(from), self.ptr_at(to), self.item_size);
        }
    }

    /// Copy one row's bytes into another column with the same stride.
    fn copy_row_to(&self, from: usize, dst: &mut Column, dst_row: usize) {
        debug_assert_eq!(self.item_size, dst.item_size);
        unsafe {
            ptr::copy_nonoverlapping(self.ptr_at(from), dst.ptr_at(dst_row), self.item_size);
        }
    }

    /// Overwrite one row with raw bytes. `src.len()` must equal the stride.
    fn write_row(&mut self, row: usize, src: &[u8]) {
        assert_eq!(src.len(), self.item_size, "payload width mismatch");
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr_at(row), self.item_size);
        }
    }

    /// One row as raw bytes.
    fn row_bytes(&self, row: usize) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr_at(row), self.item_size) }
    }

    /// The first `rows` elements as a typed slice.
    ///
    /// Panics if `T`'s layout does not match the column's stride/alignment;
    /// this is the checked seam between raw storage and typed call sites.
    pub(crate) fn as_slice<T: Copy + 'static>(&self, rows: usize) -> &[T] {
        assert_eq!(std::mem::size_of::<T>(), self.item_size, "component size mismatch");
        assert_eq!(std::mem::align_of::<T>(), self.item_align, "component alignment mismatch");
        debug_assert!(rows <= self.capacity);
        if rows == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data as *const T, rows) }
    }

    pub(crate) fn as_slice_mut<T: Copy + 'static>(&mut self, rows: usize) -> &mut [T] {
        assert_eq!(std::mem::size_of::<T>(), self.item_size, "component size mismatch");
        assert_eq!(std::mem::align_of::<T>(), self.item_align, "component alignment mismatch");
        debug_assert!(rows <= self.capacity);
        if rows == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.data as *mut T, rows) }
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if self.capacity > 0 {
            unsafe {
                alloc::dealloc(self.data, self.layout_for(self.capacity));
            }
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("capacity", &self.capacity)
            .field("item_size", &self.item_size)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Columnar storage for one data-component signature.
///
/// All columns always hold exactly `rows()` live elements; row `i` across
/// every column belongs to `entities()[i]`. The entity list is what lets a
/// swap-pop repair the bookkeeping of whichever entity owned the moved tail
/// row, including entities living in a *different* archetype that shares
/// this table.
#[derive(Debug)]
pub(crate) struct Table {
    /// Data components only, sorted by id; parallel to `columns`.
    components: Vec<ComponentInfo>,
    columns: Vec<Column>,
    /// Row -> owning entity.
    entities: Vec<EntityId>,
    capacity: usize,
}

impl Table {
    /// Build a table for a full signature; tags are filtered out here.
    pub(crate) fn new(signature: &[ComponentInfo]) -> Self {
        let components: Vec<ComponentInfo> =
            signature.iter().copied().filter(|c| c.is_data()).collect();
        let columns = components.iter().map(Column::new).collect();
        Self {
            components,
            columns,
            entities: Vec::new(),
            capacity: 0,
        }
    }

    #[inline]
    pub(crate) fn rows(&self) -> usize {
        self.entities.len()
    }

    /// Column index for a component id: binary search for concrete ids, a
    /// linear wildcard-aware scan for pair probes.
    pub(crate) fn column_index(&self, id: EntityId) -> Option<usize> {
        if id.is_pair() {
            self.components.iter().position(|c| ids_match(c.id, id))
        } else {
            self.components
                .binary_search_by(|c| cmp_ids(c.id, id))
                .ok()
        }
    }

    /// Append a row owned by `entity`, doubling capacity when full.
    pub(crate) fn add_row(&mut self, entity: EntityId) -> usize {
        if self.rows() == self.capacity {
            let new_capacity = if self.capacity == 0 { 4 } else { self.capacity * 2 };
            for column in &mut self.columns {
                column.grow(new_capacity);
            }
            self.capacity = new_capacity;
        }
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Swap-pop `row` out of every column. Returns the entity that now owns
    /// `row` (the previous tail), if any.
    pub(crate) fn remove_row(&mut self, row: usize) -> Option<EntityId> {
        let last = self.rows() - 1;
        for column in &mut self.columns {
            column.copy_row_within(last, row);
        }
        self.entities.swap_remove(row);
        if row < last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Move row `from_row` into `dst` at `dst_row` (already reserved by the
    /// caller via [`add_row`]): copy the bytes of every component present in
    /// both tables, then swap-pop the source row across *all* source columns.
    /// Returns the entity that now owns `from_row`, if any.
    ///
    /// [`add_row`]: Self::add_row
    pub(crate) fn move_row(
        &mut self,
        from_row: usize,
        dst: &mut Table,
        dst_row: usize,
    ) -> Option<EntityId> {
        let mut i = 0;
        let mut j = 0;
        while i < self.components.len() && j < dst.components.len() {
            match cmp_ids(self.components[i].id, dst.components[j].id) {
                std::cmp::Ordering::Equal => {
                    self.columns[i].copy_row_to(from_row, &mut dst.columns[j], dst_row);
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }

        let last = self.rows() - 1;
        for column in &mut self.columns {
            column.copy_row_within(last, from_row);
        }
        self.entities.swap_remove(from_row);
        if from_row < last {
            Some(self.entities[from_row])
        } else {
            None
        }
    }

    /// Overwrite the payload of one component at `row`.
    pub(crate) fn write(&mut self, column: usize, row: usize, data: &[u8]) {
        debug_assert!(row < self.rows());
        self.columns[column].write_row(row, data);
    }

    /// Raw payload bytes of one component at `row`.
    pub(crate) fn read(&self, column: usize, row: usize) -> &[u8] {
        debug_assert!(row < self.rows());
        self.columns[column].row_bytes(row)
    }

    /// Full typed column, `rows()` elements long.
    pub(crate) fn column<T: Copy + 'static>(&self, column: usize) -> &[T] {
        self.columns[column].as_slice(self.rows())
    }

    pub(crate) fn column_mut<T: Copy + 'static>(&mut self, column: usize) -> &mut [T] {
        let rows = self.rows();
        self.columns[column].as_slice_mut(rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
