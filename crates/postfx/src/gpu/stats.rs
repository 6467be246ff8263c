use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture,
    FrameBuffer,
    Program,
    Buffer,
}

/// Point-in-time copy of the live object counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    pub textures: usize,
    pub framebuffers: usize,
    pub programs: usize,
    pub buffers: usize,
}

impl fmt::Display for ResourceCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} textures, {} framebuffers, {} programs, {} buffers",
            self.textures, self.framebuffers, self.programs, self.buffers
        )
    }
}

/// Shared live-object counters of one GPU context.
#[derive(Debug, Clone, Default)]
pub struct ResourceStats {
    counts: Rc<Cell<ResourceCounts>>,
}

impl ResourceStats {
    pub fn counts(&self) -> ResourceCounts {
        self.counts.get()
    }

    /// Counts one new object until the returned guard drops.
    pub(crate) fn track(&self, kind: ResourceKind) -> StatGuard {
        self.adjust(kind, true);
        StatGuard {
            stats: self.clone(),
            kind,
        }
    }

    fn adjust(&self, kind: ResourceKind, up: bool) {
        let mut counts = self.counts.get();
        let slot = match kind {
            ResourceKind::Texture => &mut counts.textures,
            ResourceKind::FrameBuffer => &mut counts.framebuffers,
            ResourceKind::Program => &mut counts.programs,
            ResourceKind::Buffer => &mut counts.buffers,
        };
        *slot = if up { *slot + 1 } else { slot.saturating_sub(1) };
        self.counts.set(counts);
    }
}

#[derive(Debug)]
pub(crate) struct StatGuard {
    stats: ResourceStats,
    kind: ResourceKind,
}

impl Drop for StatGuard {
    fn drop(&mut self) {
        self.stats.adjust(self.kind, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_count_up_and_down() {
        let stats = ResourceStats::default();
        let a = stats.track(ResourceKind::Texture);
        let b = stats.track(ResourceKind::Texture);
        let c = stats.track(ResourceKind::Program);
        assert_eq!(stats.counts().textures, 2);
        assert_eq!(stats.counts().programs, 1);
        drop(a);
        drop(c);
        assert_eq!(
            stats.counts(),
            ResourceCounts {
                textures: 1,
                ..ResourceCounts::default()
            }
        );
        drop(b);
        assert_eq!(stats.counts(), ResourceCounts::default());
    }
}
