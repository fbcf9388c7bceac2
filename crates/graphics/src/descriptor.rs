//! Fixed-capacity descriptor heaps.
//!
//! Each heap is created once with a capacity that never changes. Slots are
//! handed out first-fit from an occupancy bitmap, so releasing a slot and
//! allocating again returns the same index. Low indices can be reserved at
//! startup for well-known views (back buffers, the main depth buffer) and are
//! then never returned by [`DescriptorSlotAllocator::allocate`].

use log::warn;
use structures::flagvec::FlagVec;

use crate::{backend::Device, DescriptorHeapConfig, Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    Rtv,
    Dsv,
    /// Shader resource views. Unordered access views share this heap.
    Srv,
}

impl DescriptorHeapKind {
    pub const ALL: [Self; 3] = [Self::Rtv, Self::Dsv, Self::Srv];

    /// Only the SRV heap is bound to the pipeline, so it is the only one with
    /// GPU addresses.
    #[must_use]
    pub fn is_shader_visible(self) -> bool {
        self == Self::Srv
    }
}

impl std::fmt::Display for DescriptorHeapKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rtv => "RTV",
            Self::Dsv => "DSV",
            Self::Srv => "SRV",
        })
    }
}

/// CPU address of a descriptor, used to write views and bind render targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuHandle(pub u64);

impl CpuHandle {
    #[must_use]
    pub fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + u64::from(index) * u64::from(stride))
    }
}

/// GPU address of a descriptor, used to bind descriptor tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle(pub u64);

impl GpuHandle {
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub fn offset(self, index: u32, stride: u32) -> Self {
        if self.is_null() {
            self
        } else {
            Self(self.0 + u64::from(index) * u64::from(stride))
        }
    }
}

/// Where a heap starts and how far apart its descriptors are.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorHeapStart {
    pub cpu: CpuHandle,
    /// [`GpuHandle::NULL`] for heaps that are not shader visible.
    pub gpu: GpuHandle,
    pub stride: u32,
}

/// One allocated descriptor.
///
/// `gpu` is [`GpuHandle::NULL`] for RTV and DSV slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescriptorSlot {
    pub kind: DescriptorHeapKind,
    pub index: u32,
    pub cpu: CpuHandle,
    pub gpu: GpuHandle,
}

pub struct DescriptorSlotAllocator {
    kind: DescriptorHeapKind,
    start: DescriptorHeapStart,
    used: FlagVec,
}

impl DescriptorSlotAllocator {
    #[must_use]
    pub fn new(kind: DescriptorHeapKind, capacity: u32, start: DescriptorHeapStart) -> Self {
        Self {
            kind,
            start,
            used: FlagVec::new(capacity as usize),
        }
    }

    #[must_use]
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.used.len() as u32
    }

    /// Claims the lowest free slot.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::DescriptorHeapExhausted`] if every slot is in use. The
    /// heap is left unchanged.
    pub fn allocate(&mut self) -> Result<DescriptorSlot> {
        let Some(index) = self.used.first_zero() else {
            warn!(
                "{} descriptor heap exhausted ({} slots in use)",
                self.kind,
                self.capacity()
            );
            return Err(Error::DescriptorHeapExhausted(self.kind));
        };

        self.used.set(index, true);
        Ok(self.slot(index as u32))
    }

    /// Frees a slot. Out-of-range and already-free indices are ignored.
    pub fn release(&mut self, index: u32) {
        if self.used.get(index as usize) {
            self.used.set(index as usize, false);
        }
    }

    /// Claims a specific slot.
    ///
    /// ## Errors
    ///
    /// Returns [`Error::DescriptorSlotInUse`] if the slot is taken, or
    /// [`Error::DescriptorIndexOutOfRange`] if the heap is smaller than
    /// `index`.
    pub fn reserve(&mut self, index: u32) -> Result<DescriptorSlot> {
        if index >= self.capacity() {
            return Err(Error::DescriptorIndexOutOfRange {
                kind: self.kind,
                index,
                capacity: self.capacity(),
            });
        }

        if self.used.set(index as usize, true) {
            return Err(Error::DescriptorSlotInUse {
                kind: self.kind,
                index,
            });
        }

        Ok(self.slot(index))
    }

    /// The slot at `index`, whether or not it is in use. Used to fetch
    /// reserved slots.
    #[must_use]
    pub fn slot(&self, index: u32) -> DescriptorSlot {
        DescriptorSlot {
            kind: self.kind,
            index,
            cpu: self.cpu_handle(index),
            gpu: self.gpu_handle(index),
        }
    }

    #[must_use]
    pub fn cpu_handle(&self, index: u32) -> CpuHandle {
        self.start.cpu.offset(index, self.start.stride)
    }

    /// The shader-visible address of the slot, or [`GpuHandle::NULL`] for RTV
    /// and DSV heaps.
    #[must_use]
    pub fn gpu_handle(&self, index: u32) -> GpuHandle {
        if self.kind.is_shader_visible() {
            self.start.gpu.offset(index, self.start.stride)
        } else {
            GpuHandle::NULL
        }
    }

    #[must_use]
    pub fn available_count(&self) -> u32 {
        self.capacity() - self.used_count()
    }

    #[must_use]
    pub fn used_count(&self) -> u32 {
        self.used.count_ones() as u32
    }

    #[must_use]
    pub fn is_index_used(&self, index: u32) -> bool {
        self.used.get(index as usize)
    }
}

/// The three descriptor heaps of a device.
pub struct DescriptorHeaps {
    rtv: DescriptorSlotAllocator,
    dsv: DescriptorSlotAllocator,
    srv: DescriptorSlotAllocator,
}

impl DescriptorHeaps {
    /// Creates all three heaps on the device.
    ///
    /// ## Errors
    ///
    /// Returns the device's error if any heap cannot be created.
    pub fn new(device: &mut dyn Device, config: &DescriptorHeapConfig) -> Result<Self> {
        let mut create = |kind: DescriptorHeapKind, capacity: u32| -> Result<DescriptorSlotAllocator> {
            let start = device.create_descriptor_heap(kind, capacity)?;
            Ok(DescriptorSlotAllocator::new(kind, capacity, start))
        };

        Ok(Self {
            rtv: create(DescriptorHeapKind::Rtv, config.rtv_capacity)?,
            dsv: create(DescriptorHeapKind::Dsv, config.dsv_capacity)?,
            srv: create(DescriptorHeapKind::Srv, config.srv_capacity)?,
        })
    }

    #[must_use]
    pub fn heap(&self, kind: DescriptorHeapKind) -> &DescriptorSlotAllocator {
        match kind {
            DescriptorHeapKind::Rtv => &self.rtv,
            DescriptorHeapKind::Dsv => &self.dsv,
            DescriptorHeapKind::Srv => &self.srv,
        }
    }

    pub fn heap_mut(&mut self, kind: DescriptorHeapKind) -> &mut DescriptorSlotAllocator {
        match kind {
            DescriptorHeapKind::Rtv => &mut self.rtv,
            DescriptorHeapKind::Dsv => &mut self.dsv,
            DescriptorHeapKind::Srv => &mut self.srv,
        }
    }

    /// See [`DescriptorSlotAllocator::allocate`].
    pub fn allocate(&mut self, kind: DescriptorHeapKind) -> Result<DescriptorSlot> {
        self.heap_mut(kind).allocate()
    }

    /// See [`DescriptorSlotAllocator::reserve`].
    pub fn reserve(&mut self, kind: DescriptorHeapKind, index: u32) -> Result<DescriptorSlot> {
        self.heap_mut(kind).reserve(index)
    }

    pub fn release(&mut self, slot: &DescriptorSlot) {
        self.heap_mut(slot.kind).release(slot.index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(kind: DescriptorHeapKind, capacity: u32) -> DescriptorSlotAllocator {
        DescriptorSlotAllocator::new(
            kind,
            capacity,
            DescriptorHeapStart {
                cpu: CpuHandle(0x1000),
                gpu: GpuHandle(0x8000),
                stride: 32,
            },
        )
    }

    #[test]
    fn handles_are_base_plus_stride() {
        let mut srv = allocator(DescriptorHeapKind::Srv, 8);
        let _ = srv.allocate().unwrap();
        let slot = srv.allocate().unwrap();

        assert_eq!(slot.index, 1);
        assert_eq!(slot.cpu, CpuHandle(0x1000 + 32));
        assert_eq!(slot.gpu, GpuHandle(0x8000 + 32));
        assert_eq!(srv.cpu_handle(5), CpuHandle(0x1000 + 5 * 32));
        assert_eq!(srv.gpu_handle(5), GpuHandle(0x8000 + 5 * 32));
    }

    #[test]
    fn rtv_and_dsv_have_no_gpu_handle() {
        let mut rtv = allocator(DescriptorHeapKind::Rtv, 2);
        let mut dsv = allocator(DescriptorHeapKind::Dsv, 2);

        assert!(rtv.allocate().unwrap().gpu.is_null());
        assert!(dsv.allocate().unwrap().gpu.is_null());
        assert!(rtv.gpu_handle(1).is_null());
    }

    #[test]
    fn allocations_are_distinct() {
        let mut srv = allocator(DescriptorHeapKind::Srv, 64);
        let mut live = Vec::new();

        // Interleave allocations and releases and check that no index is ever
        // handed out twice while it is live.
        for round in 0..200_u32 {
            if round % 3 == 2 && !live.is_empty() {
                let index = live.remove((round as usize * 7) % live.len());
                srv.release(index);
            } else if let Ok(slot) = srv.allocate() {
                assert!(!live.contains(&slot.index));
                live.push(slot.index);
            }

            assert_eq!(srv.used_count() as usize, live.len());
        }
    }

    #[test]
    fn release_then_allocate_reuses_index() {
        let mut srv = allocator(DescriptorHeapKind::Srv, 8);
        for _ in 0..4 {
            let _ = srv.allocate().unwrap();
        }

        let slot = srv.allocate().unwrap();
        srv.release(slot.index);
        assert_eq!(srv.allocate().unwrap().index, slot.index);

        srv.release(2);
        assert_eq!(srv.allocate().unwrap().index, 2);
    }

    #[test]
    fn exhaustion() {
        let mut dsv = allocator(DescriptorHeapKind::Dsv, 4);

        let indices = (0..4)
            .map(|_| dsv.allocate().unwrap().index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(dsv.available_count(), 0);

        assert!(matches!(
            dsv.allocate(),
            Err(Error::DescriptorHeapExhausted(DescriptorHeapKind::Dsv))
        ));
        assert_eq!(dsv.used_count(), 4);
    }

    #[test]
    fn reserved_index_is_never_allocated() {
        let mut rtv = allocator(DescriptorHeapKind::Rtv, 6);
        let _ = rtv.reserve(3).unwrap();

        let indices = std::iter::from_fn(|| rtv.allocate().ok())
            .map(|slot| slot.index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 2, 4, 5]);

        assert!(matches!(
            rtv.reserve(3),
            Err(Error::DescriptorSlotInUse { index: 3, .. })
        ));
        assert!(matches!(
            rtv.reserve(6),
            Err(Error::DescriptorIndexOutOfRange { capacity: 6, .. })
        ));
    }

    #[test]
    fn release_is_idempotent() {
        let mut srv = allocator(DescriptorHeapKind::Srv, 4);
        let slot = srv.allocate().unwrap();

        srv.release(slot.index);
        srv.release(slot.index);
        srv.release(1_000);

        assert_eq!(srv.used_count(), 0);
        assert_eq!(srv.available_count(), 4);
        assert!(!srv.is_index_used(slot.index));
    }

    #[test]
    fn reserved_zero_then_fill() {
        let mut srv = allocator(DescriptorHeapKind::Srv, 4);
        let reserved = srv.reserve(0).unwrap();
        assert_eq!(reserved.cpu, srv.cpu_handle(0));

        let indices = (0..3)
            .map(|_| srv.allocate().unwrap().index)
            .collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(srv.allocate().is_err());
    }
}
