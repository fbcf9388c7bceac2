use std::cell::Cell;

use windows::{
    core::{w, Interface, PCWSTR},
    Win32::{
        Foundation::{CloseHandle, HANDLE},
        Graphics::Direct3D12::*,
        System::Threading::{CreateEventW, WaitForSingleObject, INFINITE},
    },
};

use super::dx;
use crate::Result;

/// The direct queue, with one command allocator and one command list.
///
/// Only one frame is in flight: [`Queue::begin`] waits for the previous
/// submission before reusing the allocator.
pub struct Queue {
    pub queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    event: HANDLE,
    last_value: Cell<u64>,
    next_value: u64,
    last_submission: u64,
    allocator: ID3D12CommandAllocator,
    commands: ID3D12GraphicsCommandList,
}

impl Queue {
    pub fn new(dx: &dx::Interfaces) -> Result<Self> {
        let queue: ID3D12CommandQueue = unsafe {
            dx.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }?;

        let fence: ID3D12Fence = unsafe { dx.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
        let event = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }?;

        let allocator: ID3D12CommandAllocator =
            unsafe { dx.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;

        let commands: ID3D12GraphicsCommandList = unsafe {
            dx.device
                .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
        }?;
        // Command lists are created open.
        unsafe { commands.Close() }?;

        #[cfg(debug_assertions)]
        if dx.is_debug {
            unsafe {
                queue.SetName(w!("Graphics Queue"))?;
                fence.SetName(w!("Graphics Fence"))?;
                allocator.SetName(w!("Graphics Command Allocator"))?;
            }
        }

        Ok(Self {
            queue,
            fence,
            event,
            last_value: Cell::new(0),
            next_value: 1,
            last_submission: 0,
            allocator,
            commands,
        })
    }

    pub fn poll_fence(&self) -> u64 {
        self.last_value.set(
            self.last_value
                .get()
                .max(unsafe { self.fence.GetCompletedValue() }),
        );
        self.last_value.get()
    }

    pub fn is_complete(&self, fence_value: u64) -> bool {
        if fence_value > self.last_value.get() {
            self.poll_fence();
        }

        fence_value <= self.last_value.get()
    }

    pub fn wait_until(&self, fence_value: u64) -> Result<()> {
        if !self.is_complete(fence_value) {
            unsafe {
                self.fence.SetEventOnCompletion(fence_value, self.event)?;
                WaitForSingleObject(self.event, INFINITE);
            }
            self.last_value.set(fence_value);
        }
        Ok(())
    }

    /// Blocks until everything submitted so far has finished.
    pub fn flush(&mut self) -> Result<()> {
        unsafe { self.queue.Signal(&self.fence, self.next_value) }?;
        self.wait_until(self.next_value)?;
        self.next_value += 1;
        Ok(())
    }

    /// Waits for the previous submission and returns the command list, reset
    /// and open for recording.
    pub fn begin(&mut self) -> Result<ID3D12GraphicsCommandList> {
        self.wait_until(self.last_submission)?;

        unsafe {
            self.allocator.Reset()?;
            self.commands.Reset(&self.allocator, None)?;
        }

        Ok(self.commands.clone())
    }

    /// Closes and executes the command list. Returns the fence value that
    /// marks its completion.
    pub fn submit(&mut self) -> Result<u64> {
        unsafe {
            self.commands.Close()?;
            let commands: ID3D12CommandList = self.commands.cast()?;
            self.queue.ExecuteCommandLists(&[Some(commands)]);
            self.queue.Signal(&self.fence, self.next_value)?;
        }

        self.last_submission = self.next_value;
        self.next_value += 1;
        Ok(self.last_submission)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::error!("could not drain the graphics queue: {e}");
        }

        if let Err(e) = unsafe { CloseHandle(self.event) } {
            log::warn!("could not close fence event: {e}");
        }
    }
}
