// src/miner/device/opencl.rs
//! OpenCL backend for GPU devices
//!
//! Compiles a kernel supplied at runtime and drives it over nonce batches.
//! The kernel must export
//!
//! ```text
//! __kernel void search(__global const uchar *input, uint input_len,
//!                      uint start_nonce, uint count, ulong target,
//!                      __global uint *output);
//! ```
//!
//! writing flagged nonces to `output[0..n]` and `n` to `output[0xFF]`.
#![allow(unsafe_code)]

use crate::miner::device::GpuBackend;
use crate::miner::job::Target;
use crate::types::DeviceId;
use crate::utils::error::DeviceError;
use ocl::{Buffer, Context, Device, Kernel, Platform, Program, Queue, flags};
use std::path::PathBuf;

/// Largest blob the input buffer accepts
const MAX_BLOB_LEN: usize = 128;

/// Result slots; the last one holds the count
const OUTPUT_LEN: usize = 0x100;

struct OclState {
    queue: Queue,
    kernel: Kernel,
    input: Buffer<u8>,
    output: Buffer<u32>,
}

/// One OpenCL device context
pub struct OclBackend {
    id: DeviceId,
    platform: usize,
    device: usize,
    worksize: usize,
    kernel_path: PathBuf,
    state: Option<OclState>,
}

impl OclBackend {
    /// Describes the context; nothing is allocated until [`GpuBackend::init`]
    ///
    /// # Arguments
    /// * `platform` - OpenCL platform index
    /// * `device` - GPU index within the platform
    /// * `worksize` - Local work size for each launch
    /// * `kernel_path` - Kernel source file
    pub fn new(platform: usize, device: usize, worksize: usize, kernel_path: PathBuf) -> Self {
        OclBackend {
            id: DeviceId::gpu(device),
            platform,
            device,
            worksize: worksize.max(1),
            kernel_path,
            state: None,
        }
    }

    fn init_err(&self, e: impl ToString) -> DeviceError {
        DeviceError::Init {
            device: self.id.to_string(),
            reason: e.to_string(),
        }
    }

    fn compute_err(&self, e: impl ToString) -> DeviceError {
        DeviceError::Compute {
            device: self.id.to_string(),
            reason: e.to_string(),
        }
    }

    fn state(&self) -> Result<&OclState, DeviceError> {
        self.state
            .as_ref()
            .ok_or_else(|| self.compute_err("OpenCL context not initialized"))
    }
}

impl GpuBackend for OclBackend {
    fn init(&mut self) -> Result<(), DeviceError> {
        let src = std::fs::read_to_string(&self.kernel_path).map_err(|e| {
            self.init_err(format!(
                "cannot read kernel {}: {}",
                self.kernel_path.display(),
                e
            ))
        })?;

        let platform = Platform::list()
            .into_iter()
            .nth(self.platform)
            .ok_or_else(|| self.init_err(format!("no OpenCL platform #{}", self.platform)))?;
        let device = Device::list(platform, Some(flags::DEVICE_TYPE_GPU))
            .map_err(|e| self.init_err(e))?
            .into_iter()
            .nth(self.device)
            .ok_or_else(|| self.init_err(format!("no GPU #{} on platform", self.device)))?;

        let context = Context::builder()
            .platform(platform)
            .devices(device)
            .build()
            .map_err(|e| self.init_err(e))?;
        let queue = Queue::new(&context, device, None).map_err(|e| self.init_err(e))?;
        let program = Program::builder()
            .src(src)
            .devices(device)
            .build(&context)
            .map_err(|e| self.init_err(e))?;

        let input: Buffer<u8> = Buffer::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_ONLY)
            .len(MAX_BLOB_LEN)
            .build()
            .map_err(|e| self.init_err(e))?;
        let output: Buffer<u32> = Buffer::builder()
            .queue(queue.clone())
            .flags(flags::MEM_READ_WRITE)
            .len(OUTPUT_LEN)
            .build()
            .map_err(|e| self.init_err(e))?;

        let kernel = Kernel::builder()
            .program(&program)
            .name("search")
            .queue(queue.clone())
            .global_work_size(self.worksize)
            .local_work_size(self.worksize)
            .arg(&input)
            .arg(0u32)
            .arg(0u32)
            .arg(0u32)
            .arg(0u64)
            .arg(&output)
            .build()
            .map_err(|e| self.init_err(e))?;

        log::info!(
            "{}: OpenCL context ready on {}",
            self.id,
            device.name().unwrap_or_else(|_| "unknown device".into())
        );
        self.state = Some(OclState {
            queue,
            kernel,
            input,
            output,
        });
        Ok(())
    }

    fn set_work(&mut self, blob: &[u8], target: Target) -> Result<(), DeviceError> {
        if blob.len() > MAX_BLOB_LEN {
            return Err(self.compute_err(format!("blob of {} bytes too long", blob.len())));
        }
        let state = self.state()?;
        let mut padded = [0u8; MAX_BLOB_LEN];
        padded[..blob.len()].copy_from_slice(blob);
        state
            .input
            .write(&padded[..])
            .enq()
            .map_err(|e| self.compute_err(e))?;
        state
            .kernel
            .set_arg(1, blob.len() as u32)
            .map_err(|e| self.compute_err(e))?;
        state
            .kernel
            .set_arg(4, target.threshold())
            .map_err(|e| self.compute_err(e))?;
        Ok(())
    }

    fn run_work(&mut self, start_nonce: u32, count: u32) -> Result<Vec<u32>, DeviceError> {
        let state = self.state()?;
        let zero = [0u32; OUTPUT_LEN];
        state
            .output
            .write(&zero[..])
            .enq()
            .map_err(|e| self.compute_err(e))?;
        state
            .kernel
            .set_arg(2, start_nonce)
            .map_err(|e| self.compute_err(e))?;
        state
            .kernel
            .set_arg(3, count)
            .map_err(|e| self.compute_err(e))?;

        let global = (count as usize).div_ceil(self.worksize) * self.worksize;
        unsafe {
            state
                .kernel
                .cmd()
                .global_work_size(global)
                .enq()
                .map_err(|e| self.compute_err(e))?;
        }

        let mut results = vec![0u32; OUTPUT_LEN];
        state
            .output
            .read(&mut results)
            .enq()
            .map_err(|e| self.compute_err(e))?;
        state.queue.finish().map_err(|e| self.compute_err(e))?;

        let found = (results[OUTPUT_LEN - 1] as usize).min(OUTPUT_LEN - 1);
        results.truncate(found);
        Ok(results)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::debug!("{}: OpenCL context released", self.id);
        }
    }
}
