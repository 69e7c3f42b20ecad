#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, xdp},
    maps::XskMap,
    programs::XdpContext,
};
use aya_log_ebpf::info;
use xsksteer_common::{
    decide, FrameMeta, License, LicenseFeatures, QueueEndpointTable, QueueIndex, Redirector, TraceRecord,
    TraceSink, DEFAULT_CAPACITY, REDIRECT_FLAGS,
};

// The loader overrides max_entries with the configured capacity and reuses a
// map already pinned under its pin directory.
#[map(name = "socket_map")]
static SOCKET_MAP: XskMap = XskMap::pinned(DEFAULT_CAPACITY, 0);

// Patched by the loader; 0 silences per-frame trace records.
#[no_mangle]
static TRACE_ENABLED: u8 = 1;

/// Lookup and redirect both go through the same kernel socket map.
struct SocketMap<'a>(&'a XskMap);

// The value read back is the bound queue id of the registered socket.
impl QueueEndpointTable for SocketMap<'_> {
    #[inline(always)]
    fn get(&self, queue: QueueIndex) -> Option<u32> {
        self.0.get(queue)
    }
}

impl Redirector for SocketMap<'_> {
    #[inline(always)]
    fn redirect(&self, queue: QueueIndex) -> u32 {
        // Err carries the fallback action from the flags, which is a verdict too.
        match self.0.redirect(queue, REDIRECT_FLAGS) {
            Ok(action) | Err(action) => action,
        }
    }
}

struct LogSink<'a> {
    ctx: &'a XdpContext,
    enabled: bool,
}

impl TraceSink for LogSink<'_> {
    #[inline(always)]
    fn emit(&self, record: &TraceRecord) {
        if !self.enabled {
            return;
        }
        match *record {
            TraceRecord::Redirect {
                queue,
                status,
                endpoint,
            } => info!(
                self.ctx,
                "XDP_REDIRECT queue={}, ret={}, val={}", queue, status, endpoint
            ),
            TraceRecord::Pass { queue } => info!(self.ctx, "XDP_PASS queue={} val=NULL", queue),
        }
    }
}

#[xdp]
pub fn xsksteer(ctx: XdpContext) -> u32 {
    let meta = FrameMeta::new(unsafe { (*ctx.ctx).rx_queue_index });
    let sink = LogSink {
        ctx: &ctx,
        enabled: unsafe { core::ptr::read_volatile(&TRACE_ENABLED) } != 0,
    };
    let map = SocketMap(&SOCKET_MAP);

    decide(&meta, &map, &map, &sink).verdict
}

const PROGRAM_LICENSE: License = License::from_features(LicenseFeatures {
    gpl_v2: cfg!(feature = "license-gpl-v2"),
    dual_bsd_gpl: cfg!(feature = "license-dual-bsd-gpl"),
    dual_mit_gpl: cfg!(feature = "license-dual-mit-gpl"),
    dual_mpl_gpl: cfg!(feature = "license-dual-mpl-gpl"),
});

const LICENSE_BYTES: &[u8] = PROGRAM_LICENSE.section();

#[link_section = "license"]
#[no_mangle]
static LICENSE: [u8; LICENSE_BYTES.len()] = {
    let mut out = [0u8; LICENSE_BYTES.len()];
    let mut i = 0;
    while i < LICENSE_BYTES.len() {
        out[i] = LICENSE_BYTES[i];
        i += 1;
    }
    out
};

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
