//! Headless software GPU
//!
//! Implements the explicit API traits without any graphics hardware. Submitted
//! work runs on one of three timelines (see `GpuTimeline`), fences complete when
//! their signal is retired, and the misuse a debug layer would catch is turned
//! into failing status codes and counted in `HeadlessStats`:
//!
//! - resetting a command allocator whose lists are still executing (`E_FAIL`)
//! - resetting an open command list, closing a closed one, executing an open one
//! - recording into a closed list, binding a descriptor table outside the bound
//!   heaps, writing a view into a heap of the wrong type
//!
//! Any call listed in `HeadlessCall` can be made to fail once with a chosen status.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use pico_engine::native::{FenceEvent, HResult, NativeResult};
use pico_engine::{engine_debug, engine_trace, engine_warn};
use rustc_hash::FxHashMap;

use crate::native::{
    Adapter, AdapterDesc, CommandAllocator, CommandListType, CommandQueue, CpuDescriptorHandle, DescriptorHeap,
    DescriptorHeapDesc, DescriptorHeapFlags, DescriptorHeapType, Device, Factory, FeatureLevel, Fence,
    GpuDescriptorHandle, GpuPreference, GraphicsCommandList, InfoQueue, MessageSeverity, Resource, ResourceDesc,
    ResourceDimension, MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2,
};

/// Spacing between the base addresses of two headless descriptor heaps
const HEAP_ADDRESS_SPACING: u64 = 0x1000_0000;
/// GPU addresses of shader-visible heaps live above this
const GPU_ADDRESS_OFFSET: u64 = 0x7F00_0000_0000;

/// When submitted GPU work completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuTimeline {
    /// Work completes during the submitting call
    Immediate,
    /// A worker thread executes submissions in order, each command list taking `latency`
    Threaded { latency: Duration },
    /// Work accumulates until the caller retires it (`HeadlessFactory::retire_frames`)
    Manual,
}

/// Native calls that can be made to fail through `HeadlessFactory::fail_next`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeadlessCall {
    EnableDebugLayer,
    CreateDevice,
    CheckFeatureLevels,
    CreateCommandQueue,
    CreateCommandAllocator,
    CreateCommandList,
    CreateFence,
    CreateDescriptorHeap,
    CreateResource,
    ResetCommandAllocator,
    ResetCommandList,
    CloseCommandList,
    ExecuteCommandLists,
    Signal,
    SetEventOnCompletion,
    InfoQueue,
}

/// Counters kept by the headless GPU
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Command lists the GPU finished executing
    pub lists_executed: u64,
    /// Render-target clears executed
    pub clears: u64,
    /// Draw calls executed
    pub draws: u64,
    /// Root descriptor tables bound by executed lists
    pub descriptor_tables_bound: u64,
    /// Successful command allocator resets
    pub allocator_resets: u64,
    /// Allocator resets refused because the allocator was still in use
    pub reset_violations: u64,
    /// Other debug-layer style violations (see module docs)
    pub recording_violations: u64,
    /// Fence signals submitted but not yet reached by the GPU
    pub pending_signals: u64,
    /// Highest `pending_signals` ever observed
    pub max_pending_signals: u64,
    /// Render-target and shader-resource views written
    pub views_created: u64,
}

/// Simulated adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadlessAdapterSpec {
    pub name: String,
    /// `None` for adapters the explicit API cannot drive at all
    pub max_feature_level: Option<FeatureLevel>,
    pub dedicated_video_memory: u64,
    pub software: bool,
}

impl HeadlessAdapterSpec {
    pub fn hardware(name: &str, max_feature_level: FeatureLevel, dedicated_video_memory: u64) -> Self {
        Self {
            name: name.to_string(),
            max_feature_level: Some(max_feature_level),
            dedicated_video_memory,
            software: false,
        }
    }

    pub fn software(name: &str, max_feature_level: FeatureLevel) -> Self {
        Self {
            name: name.to_string(),
            max_feature_level: Some(max_feature_level),
            dedicated_video_memory: 0,
            software: true,
        }
    }

    pub fn unsupported(name: &str, dedicated_video_memory: u64) -> Self {
        Self {
            name: name.to_string(),
            max_feature_level: None,
            dedicated_video_memory,
            software: false,
        }
    }
}

// ===== SHARED GPU STATE =====

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Clone, Copy)]
struct HeapRange {
    heap_type: DescriptorHeapType,
    cpu_start: usize,
    gpu_start: u64,
    count: u32,
    stride: u32,
}

impl HeapRange {
    fn contains_cpu(&self, ptr: usize) -> bool {
        ptr >= self.cpu_start
            && ptr < self.cpu_start + self.count as usize * self.stride as usize
            && (ptr - self.cpu_start) % self.stride as usize == 0
    }

    fn contains_gpu(&self, ptr: u64) -> bool {
        self.gpu_start != 0
            && ptr >= self.gpu_start
            && ptr < self.gpu_start + self.count as u64 * self.stride as u64
            && (ptr - self.gpu_start) % self.stride as u64 == 0
    }
}

enum Work {
    Execute {
        allocator: Arc<AllocatorState>,
        clears: u64,
        draws: u64,
        tables: u64,
    },
    Signal {
        fence: Arc<FenceState>,
        value: u64,
    },
}

struct GpuShared {
    timeline: GpuTimeline,
    stats: Mutex<HeadlessStats>,
    faults: Mutex<FxHashMap<HeadlessCall, HResult>>,
    debug_layer: AtomicBool,
    info_breaks: Mutex<FxHashMap<MessageSeverity, bool>>,
    heaps: Mutex<Vec<HeapRange>>,
    next_heap_base: AtomicU64,
    backlog: Mutex<VecDeque<Work>>,
}

impl GpuShared {
    fn new(timeline: GpuTimeline) -> Self {
        Self {
            timeline,
            stats: Mutex::new(HeadlessStats::default()),
            faults: Mutex::new(FxHashMap::default()),
            debug_layer: AtomicBool::new(false),
            info_breaks: Mutex::new(FxHashMap::default()),
            heaps: Mutex::new(Vec::new()),
            next_heap_base: AtomicU64::new(HEAP_ADDRESS_SPACING),
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail with the injected status, if one is armed for `call`
    fn check(&self, call: HeadlessCall) -> NativeResult<()> {
        match lock(&self.faults).remove(&call) {
            Some(status) => {
                engine_debug!("pico::dx12::headless", "Injected failure for {:?}: {}", call, status);
                Err(status)
            }
            None => Ok(()),
        }
    }

    fn violation(&self, what: &str) {
        engine_warn!("pico::dx12::headless", "Validation: {}", what);
        lock(&self.stats).recording_violations += 1;
    }

    fn heap_containing_cpu(&self, ptr: usize) -> Option<HeapRange> {
        lock(&self.heaps).iter().copied().find(|range| range.contains_cpu(ptr))
    }

    /// Account for a submission and hand it to the timeline
    fn submit(&self, work: Work, worker: Option<&Sender<Work>>) -> NativeResult<()> {
        match &work {
            Work::Execute { allocator, .. } => {
                allocator.in_flight.fetch_add(1, Ordering::SeqCst);
            }
            Work::Signal { .. } => {
                let mut stats = lock(&self.stats);
                stats.pending_signals += 1;
                stats.max_pending_signals = stats.max_pending_signals.max(stats.pending_signals);
            }
        }

        match self.timeline {
            GpuTimeline::Immediate => {
                self.process(work);
                Ok(())
            }
            GpuTimeline::Threaded { .. } => {
                let sender = worker.ok_or(HResult::DXGI_ERROR_DEVICE_HUNG)?;
                sender.send(work).map_err(|_| HResult::DXGI_ERROR_DEVICE_HUNG)
            }
            GpuTimeline::Manual => {
                lock(&self.backlog).push_back(work);
                Ok(())
            }
        }
    }

    /// Execute one unit of GPU work
    fn process(&self, work: Work) {
        match work {
            Work::Execute { allocator, clears, draws, tables } => {
                {
                    let mut stats = lock(&self.stats);
                    stats.lists_executed += 1;
                    stats.clears += clears;
                    stats.draws += draws;
                    stats.descriptor_tables_bound += tables;
                }
                allocator.in_flight.fetch_sub(1, Ordering::SeqCst);
            }
            Work::Signal { fence, value } => {
                lock(&self.stats).pending_signals -= 1;
                fence.complete(value);
            }
        }
    }
}

// ===== FACTORY / ADAPTER =====

/// Headless adapter/device factory
///
/// Also the control surface of the simulated GPU: stats, fault injection and,
/// on the `Manual` timeline, retiring submitted work.
pub struct HeadlessFactory {
    shared: Arc<GpuShared>,
    adapters: Vec<HeadlessAdapterSpec>,
}

impl HeadlessFactory {
    /// Factory exposing a single feature level 12_1 hardware adapter
    pub fn new(timeline: GpuTimeline) -> Self {
        Self::with_adapters(
            timeline,
            vec![HeadlessAdapterSpec::hardware("PicoGine Headless GPU", FeatureLevel::Level12_1, 8 << 30)],
        )
    }

    pub fn with_adapters(timeline: GpuTimeline, adapters: Vec<HeadlessAdapterSpec>) -> Self {
        Self {
            shared: Arc::new(GpuShared::new(timeline)),
            adapters,
        }
    }

    pub fn timeline(&self) -> GpuTimeline {
        self.shared.timeline
    }

    /// Snapshot of the GPU counters
    pub fn stats(&self) -> HeadlessStats {
        lock(&self.shared.stats).clone()
    }

    /// Make the next `call` fail with `status`
    pub fn fail_next(&self, call: HeadlessCall, status: HResult) {
        lock(&self.shared.faults).insert(call, status);
    }

    pub fn is_debug_layer_enabled(&self) -> bool {
        self.shared.debug_layer.load(Ordering::SeqCst)
    }

    /// Whether the info queue currently breaks on `severity`
    pub fn breaks_on(&self, severity: MessageSeverity) -> bool {
        lock(&self.shared.info_breaks).get(&severity).copied().unwrap_or(false)
    }

    /// Descriptor heaps currently alive
    pub fn live_descriptor_heaps(&self) -> usize {
        lock(&self.shared.heaps).len()
    }

    /// Submissions waiting on the `Manual` timeline
    pub fn backlog_len(&self) -> usize {
        lock(&self.shared.backlog).len()
    }

    /// Retire queued work until `frames` fence signals have been reached
    ///
    /// Returns the number of signals actually retired.
    pub fn retire_frames(&self, frames: usize) -> usize {
        let mut retired = 0;
        while retired < frames {
            let Some(work) = lock(&self.shared.backlog).pop_front() else {
                break;
            };
            if matches!(work, Work::Signal { .. }) {
                retired += 1;
            }
            self.shared.process(work);
        }
        retired
    }

    /// Retire everything queued on the `Manual` timeline
    pub fn retire_all(&self) {
        while let Some(work) = lock(&self.shared.backlog).pop_front() {
            self.shared.process(work);
        }
    }

    fn adapter_spec<'a>(&self, adapter: &'a dyn Adapter) -> NativeResult<&'a HeadlessAdapterSpec> {
        adapter
            .as_any()
            .downcast_ref::<HeadlessAdapter>()
            .map(|a| &a.spec)
            .ok_or(HResult::E_INVALIDARG)
    }
}

impl Factory for HeadlessFactory {
    fn enable_debug_layer(&self) -> NativeResult<()> {
        self.shared.check(HeadlessCall::EnableDebugLayer)?;
        self.shared.debug_layer.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn enum_adapter_by_gpu_preference(&self, index: u32, preference: GpuPreference) -> NativeResult<Arc<dyn Adapter>> {
        let mut ordered: Vec<&HeadlessAdapterSpec> = self.adapters.iter().collect();
        match preference {
            GpuPreference::HighPerformance => ordered.sort_by(|a, b| b.dedicated_video_memory.cmp(&a.dedicated_video_memory)),
            GpuPreference::MinimumPower => ordered.sort_by_key(|a| a.dedicated_video_memory),
            GpuPreference::Unspecified => {}
        }
        let spec = ordered.get(index as usize).ok_or(HResult::DXGI_ERROR_NOT_FOUND)?;
        Ok(Arc::new(HeadlessAdapter { spec: (*spec).clone() }))
    }

    fn check_device_support(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<()> {
        let spec = self.adapter_spec(adapter)?;
        match spec.max_feature_level {
            Some(max) if max >= level => Ok(()),
            _ => Err(HResult::DXGI_ERROR_UNSUPPORTED),
        }
    }

    fn create_device(&self, adapter: &dyn Adapter, level: FeatureLevel) -> NativeResult<Arc<dyn Device>> {
        self.shared.check(HeadlessCall::CreateDevice)?;
        self.check_device_support(adapter, level)?;
        let spec = self.adapter_spec(adapter)?;
        engine_debug!("pico::dx12::headless", "Device created on '{}' at {}", spec.name, level);
        Ok(Arc::new(HeadlessDevice {
            shared: Arc::clone(&self.shared),
            adapter_name: spec.name.clone(),
            max_feature_level: spec.max_feature_level.unwrap_or(level),
            feature_level: level,
        }))
    }
}

/// Headless adapter
pub struct HeadlessAdapter {
    spec: HeadlessAdapterSpec,
}

impl Adapter for HeadlessAdapter {
    fn desc(&self) -> AdapterDesc {
        AdapterDesc {
            description: self.spec.name.clone(),
            dedicated_video_memory: self.spec.dedicated_video_memory,
            software: self.spec.software,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== DEVICE =====

/// Headless device
pub struct HeadlessDevice {
    shared: Arc<GpuShared>,
    adapter_name: String,
    max_feature_level: FeatureLevel,
    feature_level: FeatureLevel,
}

impl HeadlessDevice {
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Level the device was created at
    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }
}

impl Device for HeadlessDevice {
    fn check_feature_levels(&self, requested: &[FeatureLevel]) -> NativeResult<FeatureLevel> {
        self.shared.check(HeadlessCall::CheckFeatureLevels)?;
        requested
            .iter()
            .copied()
            .filter(|level| *level <= self.max_feature_level)
            .max()
            .ok_or(HResult::DXGI_ERROR_UNSUPPORTED)
    }

    fn create_command_queue(&self, list_type: CommandListType) -> NativeResult<Box<dyn CommandQueue>> {
        self.shared.check(HeadlessCall::CreateCommandQueue)?;

        let worker = match self.shared.timeline {
            GpuTimeline::Threaded { latency } => {
                let (sender, receiver) = mpsc::channel::<Work>();
                let shared = Arc::clone(&self.shared);
                let handle = std::thread::Builder::new()
                    .name("pico-headless-gpu".to_string())
                    .spawn(move || {
                        for work in receiver {
                            if matches!(work, Work::Execute { .. }) && !latency.is_zero() {
                                std::thread::sleep(latency);
                            }
                            shared.process(work);
                        }
                    })
                    .map_err(|_| HResult::E_OUTOFMEMORY)?;
                Some((sender, handle))
            }
            GpuTimeline::Immediate | GpuTimeline::Manual => None,
        };

        Ok(Box::new(HeadlessCommandQueue {
            shared: Arc::clone(&self.shared),
            list_type,
            worker,
        }))
    }

    fn create_command_allocator(&self, list_type: CommandListType) -> NativeResult<Arc<dyn CommandAllocator>> {
        self.shared.check(HeadlessCall::CreateCommandAllocator)?;
        Ok(Arc::new(HeadlessCommandAllocator {
            shared: Arc::clone(&self.shared),
            state: Arc::new(AllocatorState {
                list_type,
                in_flight: AtomicUsize::new(0),
                recording: AtomicBool::new(false),
            }),
        }))
    }

    fn create_command_list(
        &self,
        list_type: CommandListType,
        allocator: &Arc<dyn CommandAllocator>,
    ) -> NativeResult<Box<dyn GraphicsCommandList>> {
        self.shared.check(HeadlessCall::CreateCommandList)?;
        let state = allocator_state(allocator.as_ref())?;
        if state.list_type != list_type || state.recording.swap(true, Ordering::SeqCst) {
            return Err(HResult::E_INVALIDARG);
        }
        Ok(Box::new(HeadlessCommandList {
            shared: Arc::clone(&self.shared),
            allocator: state,
            open: true,
            clears: 0,
            draws: 0,
            tables: 0,
            bound_heaps: Vec::new(),
            render_target: None,
        }))
    }

    fn create_fence(&self, initial_value: u64) -> NativeResult<Arc<dyn Fence>> {
        self.shared.check(HeadlessCall::CreateFence)?;
        Ok(Arc::new(HeadlessFence {
            shared: Arc::clone(&self.shared),
            state: Arc::new(FenceState {
                completed: AtomicU64::new(initial_value),
                waiters: Mutex::new(Vec::new()),
            }),
        }))
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> NativeResult<Box<dyn DescriptorHeap>> {
        self.shared.check(HeadlessCall::CreateDescriptorHeap)?;

        let shader_visible = desc.flags.contains(DescriptorHeapFlags::SHADER_VISIBLE);
        if desc.num_descriptors == 0 {
            return Err(HResult::E_INVALIDARG);
        }
        if shader_visible && matches!(desc.heap_type, DescriptorHeapType::Rtv | DescriptorHeapType::Dsv) {
            return Err(HResult::E_INVALIDARG);
        }
        if shader_visible && desc.num_descriptors > MAX_SHADER_VISIBLE_DESCRIPTORS_TIER_2 {
            return Err(HResult::E_OUTOFMEMORY);
        }

        let stride = self.descriptor_handle_increment_size(desc.heap_type);
        let base = self.shared.next_heap_base.fetch_add(HEAP_ADDRESS_SPACING, Ordering::SeqCst);
        let range = HeapRange {
            heap_type: desc.heap_type,
            cpu_start: base as usize,
            gpu_start: if shader_visible { GPU_ADDRESS_OFFSET + base } else { 0 },
            count: desc.num_descriptors,
            stride,
        };
        lock(&self.shared.heaps).push(range);
        engine_trace!(
            "pico::dx12::headless",
            "{:?} heap of {} descriptors at 0x{:X}",
            desc.heap_type,
            desc.num_descriptors,
            base
        );

        Ok(Box::new(HeadlessDescriptorHeap {
            shared: Arc::clone(&self.shared),
            desc: *desc,
            range,
        }))
    }

    fn descriptor_handle_increment_size(&self, heap_type: DescriptorHeapType) -> u32 {
        match heap_type {
            DescriptorHeapType::CbvSrvUav | DescriptorHeapType::Sampler | DescriptorHeapType::Rtv => 32,
            DescriptorHeapType::Dsv => 8,
        }
    }

    fn create_committed_resource(&self, desc: &ResourceDesc) -> NativeResult<Arc<dyn Resource>> {
        self.shared.check(HeadlessCall::CreateResource)?;
        if desc.width == 0 || desc.height == 0 {
            return Err(HResult::E_INVALIDARG);
        }
        let size = match desc.dimension {
            ResourceDimension::Buffer => usize::try_from(desc.width).map_err(|_| HResult::E_OUTOFMEMORY)?,
            ResourceDimension::Texture2D => 0,
        };
        Ok(Arc::new(HeadlessResource {
            desc: *desc,
            data: Mutex::new(vec![0; size]),
        }))
    }

    fn create_render_target_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle) {
        self.create_view(resource, dest, DescriptorHeapType::Rtv, ResourceDimension::Texture2D);
    }

    fn create_shader_resource_view(&self, resource: &dyn Resource, dest: CpuDescriptorHandle) {
        self.create_view(resource, dest, DescriptorHeapType::CbvSrvUav, ResourceDimension::Buffer);
    }

    fn info_queue(&self) -> NativeResult<Arc<dyn InfoQueue>> {
        self.shared.check(HeadlessCall::InfoQueue)?;
        if !self.shared.debug_layer.load(Ordering::SeqCst) {
            return Err(HResult::E_NOINTERFACE);
        }
        Ok(Arc::new(HeadlessInfoQueue { shared: Arc::clone(&self.shared) }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl HeadlessDevice {
    fn create_view(
        &self,
        resource: &dyn Resource,
        dest: CpuDescriptorHandle,
        heap_type: DescriptorHeapType,
        dimension: ResourceDimension,
    ) {
        match self.shared.heap_containing_cpu(dest.ptr) {
            Some(range) if range.heap_type == heap_type => {}
            _ => self.shared.violation(&format!("{:?} view written outside a {:?} heap", heap_type, heap_type)),
        }
        if resource.desc().dimension != dimension {
            self.shared.violation(&format!("{:?} view of a {:?} resource", heap_type, resource.desc().dimension));
        }
        lock(&self.shared.stats).views_created += 1;
    }
}

/// Headless info queue
pub struct HeadlessInfoQueue {
    shared: Arc<GpuShared>,
}

impl InfoQueue for HeadlessInfoQueue {
    fn set_break_on_severity(&self, severity: MessageSeverity, enable: bool) -> NativeResult<()> {
        lock(&self.shared.info_breaks).insert(severity, enable);
        Ok(())
    }
}

// ===== QUEUE / ALLOCATOR / LIST =====

/// Headless command queue
pub struct HeadlessCommandQueue {
    shared: Arc<GpuShared>,
    list_type: CommandListType,
    worker: Option<(Sender<Work>, JoinHandle<()>)>,
}

impl CommandQueue for HeadlessCommandQueue {
    fn execute_command_lists(&self, lists: &[&dyn GraphicsCommandList]) -> NativeResult<()> {
        self.shared.check(HeadlessCall::ExecuteCommandLists)?;

        let mut batch = Vec::with_capacity(lists.len());
        for list in lists {
            let list = list.as_any().downcast_ref::<HeadlessCommandList>().ok_or(HResult::E_INVALIDARG)?;
            if list.open {
                self.shared.violation("executing a command list that is still open");
                return Err(HResult::E_FAIL);
            }
            if list.allocator.list_type != self.list_type {
                return Err(HResult::E_INVALIDARG);
            }
            batch.push(Work::Execute {
                allocator: Arc::clone(&list.allocator),
                clears: list.clears,
                draws: list.draws,
                tables: list.tables,
            });
        }

        let sender = self.worker.as_ref().map(|(sender, _)| sender);
        for work in batch {
            self.shared.submit(work, sender)?;
        }
        Ok(())
    }

    fn signal(&self, fence: &Arc<dyn Fence>, value: u64) -> NativeResult<()> {
        self.shared.check(HeadlessCall::Signal)?;
        let fence = fence.as_any().downcast_ref::<HeadlessFence>().ok_or(HResult::E_INVALIDARG)?;
        let work = Work::Signal { fence: Arc::clone(&fence.state), value };
        self.shared.submit(work, self.worker.as_ref().map(|(sender, _)| sender))
    }
}

impl Drop for HeadlessCommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is left and exit
        if let Some((sender, handle)) = self.worker.take() {
            drop(sender);
            if handle.join().is_err() {
                engine_warn!("pico::dx12::headless", "GPU worker thread panicked");
            }
        }
    }
}

struct AllocatorState {
    list_type: CommandListType,
    /// Submitted command lists recorded into this allocator that the GPU has not finished
    in_flight: AtomicUsize,
    /// A command list is currently open on this allocator
    recording: AtomicBool,
}

fn allocator_state(allocator: &dyn CommandAllocator) -> NativeResult<Arc<AllocatorState>> {
    allocator
        .as_any()
        .downcast_ref::<HeadlessCommandAllocator>()
        .map(|a| Arc::clone(&a.state))
        .ok_or(HResult::E_INVALIDARG)
}

/// Headless command allocator
pub struct HeadlessCommandAllocator {
    shared: Arc<GpuShared>,
    state: Arc<AllocatorState>,
}

impl HeadlessCommandAllocator {
    /// Whether the GPU is still executing lists recorded into this allocator
    pub fn is_busy(&self) -> bool {
        self.state.in_flight.load(Ordering::SeqCst) > 0
    }
}

impl CommandAllocator for HeadlessCommandAllocator {
    fn reset(&self) -> NativeResult<()> {
        self.shared.check(HeadlessCall::ResetCommandAllocator)?;
        if self.is_busy() || self.state.recording.load(Ordering::SeqCst) {
            engine_warn!("pico::dx12::headless", "Validation: command allocator reset while still in use");
            lock(&self.shared.stats).reset_violations += 1;
            return Err(HResult::E_FAIL);
        }
        lock(&self.shared.stats).allocator_resets += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Headless graphics command list
pub struct HeadlessCommandList {
    shared: Arc<GpuShared>,
    allocator: Arc<AllocatorState>,
    open: bool,
    clears: u64,
    draws: u64,
    tables: u64,
    bound_heaps: Vec<HeapRange>,
    render_target: Option<CpuDescriptorHandle>,
}

impl HeadlessCommandList {
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Draw calls recorded since the last reset
    pub fn recorded_draws(&self) -> u64 {
        self.draws
    }

    /// Render target bound since the last reset
    pub fn render_target(&self) -> Option<CpuDescriptorHandle> {
        self.render_target
    }

    fn require_open(&self, command: &str) -> bool {
        if !self.open {
            self.shared.violation(&format!("{} recorded into a closed command list", command));
        }
        self.open
    }
}

impl GraphicsCommandList for HeadlessCommandList {
    fn reset(&mut self, allocator: &Arc<dyn CommandAllocator>) -> NativeResult<()> {
        self.shared.check(HeadlessCall::ResetCommandList)?;
        if self.open {
            self.shared.violation("resetting a command list that is still open");
            return Err(HResult::E_FAIL);
        }
        let state = allocator_state(allocator.as_ref())?;
        if state.recording.swap(true, Ordering::SeqCst) {
            self.shared.violation("command allocator already has an open command list");
            return Err(HResult::E_FAIL);
        }
        self.allocator = state;
        self.open = true;
        self.clears = 0;
        self.draws = 0;
        self.tables = 0;
        self.bound_heaps.clear();
        self.render_target = None;
        Ok(())
    }

    fn close(&mut self) -> NativeResult<()> {
        self.shared.check(HeadlessCall::CloseCommandList)?;
        if !self.open {
            self.shared.violation("closing a command list that is already closed");
            return Err(HResult::E_FAIL);
        }
        self.open = false;
        self.allocator.recording.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn clear_render_target_view(&mut self, view: CpuDescriptorHandle, _color: [f32; 4]) {
        if !self.require_open("ClearRenderTargetView") {
            return;
        }
        match self.shared.heap_containing_cpu(view.ptr) {
            Some(range) if range.heap_type == DescriptorHeapType::Rtv => self.clears += 1,
            _ => self.shared.violation("clearing a render target view that is not in an RTV heap"),
        }
    }

    fn om_set_render_target(&mut self, view: CpuDescriptorHandle, width: u32, height: u32) {
        if !self.require_open("OMSetRenderTargets") {
            return;
        }
        if width == 0 || height == 0 {
            self.shared.violation("empty viewport");
            return;
        }
        match self.shared.heap_containing_cpu(view.ptr) {
            Some(range) if range.heap_type == DescriptorHeapType::Rtv => self.render_target = Some(view),
            _ => self.shared.violation("binding a render target view that is not in an RTV heap"),
        }
    }

    fn set_descriptor_heaps(&mut self, heaps: &[&dyn DescriptorHeap]) {
        if !self.require_open("SetDescriptorHeaps") {
            return;
        }
        self.bound_heaps.clear();
        for heap in heaps {
            match self.shared.heap_containing_cpu(heap.cpu_descriptor_handle_for_heap_start().ptr) {
                Some(range) if range.gpu_start != 0 => self.bound_heaps.push(range),
                _ => self.shared.violation("binding a descriptor heap that is not shader visible"),
            }
        }
    }

    fn set_graphics_root_descriptor_table(&mut self, _root_parameter_index: u32, base: GpuDescriptorHandle) {
        if !self.require_open("SetGraphicsRootDescriptorTable") {
            return;
        }
        if self.bound_heaps.iter().any(|range| range.contains_gpu(base.ptr)) {
            self.tables += 1;
        } else {
            self.shared.violation("descriptor table outside the bound descriptor heaps");
        }
    }

    fn draw_instanced(&mut self, _vertex_count: u32, _instance_count: u32, _start_vertex: u32, _start_instance: u32) {
        if self.require_open("DrawInstanced") {
            self.draws += 1;
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== FENCE =====

struct FenceState {
    completed: AtomicU64,
    waiters: Mutex<Vec<(u64, Arc<FenceEvent>)>>,
}

impl FenceState {
    fn complete(&self, value: u64) {
        let mut waiters = lock(&self.waiters);
        self.completed.fetch_max(value, Ordering::SeqCst);
        waiters.retain(|(target, event)| {
            if *target <= value {
                event.set();
                false
            } else {
                true
            }
        });
    }
}

/// Headless fence
pub struct HeadlessFence {
    shared: Arc<GpuShared>,
    state: Arc<FenceState>,
}

impl HeadlessFence {
    /// Number of events still waiting on this fence
    pub fn pending_waiters(&self) -> usize {
        lock(&self.state.waiters).len()
    }
}

impl Fence for HeadlessFence {
    fn completed_value(&self) -> u64 {
        self.state.completed.load(Ordering::SeqCst)
    }

    fn set_event_on_completion(&self, value: u64, event: &Arc<FenceEvent>) -> NativeResult<()> {
        self.shared.check(HeadlessCall::SetEventOnCompletion)?;
        // Checked under the waiter lock so a concurrent completion cannot be missed
        let mut waiters = lock(&self.state.waiters);
        if self.state.completed.load(Ordering::SeqCst) >= value {
            event.set();
        } else {
            waiters.push((value, Arc::clone(event)));
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ===== DESCRIPTOR HEAP / RESOURCE =====

/// Headless descriptor heap
pub struct HeadlessDescriptorHeap {
    shared: Arc<GpuShared>,
    desc: DescriptorHeapDesc,
    range: HeapRange,
}

impl DescriptorHeap for HeadlessDescriptorHeap {
    fn desc(&self) -> DescriptorHeapDesc {
        self.desc
    }

    fn cpu_descriptor_handle_for_heap_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle { ptr: self.range.cpu_start }
    }

    fn gpu_descriptor_handle_for_heap_start(&self) -> GpuDescriptorHandle {
        GpuDescriptorHandle { ptr: self.range.gpu_start }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HeadlessDescriptorHeap {
    fn drop(&mut self) {
        lock(&self.shared.heaps).retain(|range| range.cpu_start != self.range.cpu_start);
    }
}

/// Headless committed resource
pub struct HeadlessResource {
    desc: ResourceDesc,
    data: Mutex<Vec<u8>>,
}

impl HeadlessResource {
    /// Copy of the buffer contents
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }
}

impl Resource for HeadlessResource {
    fn desc(&self) -> ResourceDesc {
        self.desc
    }

    fn write(&self, offset: u64, data: &[u8]) -> NativeResult<()> {
        let mut contents = lock(&self.data);
        let start = usize::try_from(offset).map_err(|_| HResult::E_INVALIDARG)?;
        let end = start.checked_add(data.len()).ok_or(HResult::E_INVALIDARG)?;
        if self.desc.dimension != ResourceDimension::Buffer || end > contents.len() {
            return Err(HResult::E_INVALIDARG);
        }
        contents[start..end].copy_from_slice(data);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "headless_tests.rs"]
mod tests;
