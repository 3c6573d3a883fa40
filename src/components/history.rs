use egui::Rect;
use std::collections::VecDeque;

use crate::canvas::{Layer, PixelBuffer, PixelRegion, remap_moved_index};

// ============================================================================
// HISTORY PATCH - before/after copies of one rectangle of one layer
// ============================================================================

/// A rectangular patch of pixel data for undo/redo.
#[derive(Clone, Debug)]
pub struct HistoryPatch {
    pub layer_index: usize,
    pub region: PixelRegion,
    pub before: PixelBuffer,
    pub after: PixelBuffer,
    pub description: String,
    /// `before` and `after` are whole layer buffers of different sizes;
    /// replaying assigns them instead of blitting.
    pub swaps_buffer: bool,
}

impl HistoryPatch {
    pub fn new(
        description: impl Into<String>,
        layer_index: usize,
        region: PixelRegion,
        before: PixelBuffer,
        after: PixelBuffer,
    ) -> Self {
        Self {
            layer_index,
            region,
            before,
            after,
            description: description.into(),
            swaps_buffer: false,
        }
    }

    /// A patch for an operation that resized the layer (a bake onto the
    /// canvas grid).  `region` spans both buffers.
    pub fn whole_buffer(
        description: impl Into<String>,
        layer_index: usize,
        before: PixelBuffer,
        after: PixelBuffer,
    ) -> Self {
        let region = PixelRegion::full(before.width().max(after.width()), before.height().max(after.height()));
        Self {
            swaps_buffer: true,
            ..Self::new(description, layer_index, region, before, after)
        }
    }

    /// Build a patch by diffing two full-layer buffers over `region`.
    pub fn from_buffers(
        description: impl Into<String>,
        layer_index: usize,
        region: PixelRegion,
        before: &PixelBuffer,
        after: &PixelBuffer,
    ) -> Self {
        Self::new(
            description,
            layer_index,
            region,
            before.extract_region(region),
            after.extract_region(region),
        )
    }

    fn apply(&self, layers: &mut [Layer], use_after: bool) -> bool {
        let Some(layer) = layers.get_mut(self.layer_index) else {
            log_warn!("HistoryPatch: layer index {} out of bounds", self.layer_index);
            return false;
        };
        let src = if use_after { &self.after } else { &self.before };
        if self.swaps_buffer {
            layer.pixels = src.clone();
        } else {
            layer.pixels.blit(self.region.x as i64, self.region.y as i64, src);
        }
        layer.touch();
        true
    }

    pub fn memory_size(&self) -> usize {
        self.before.memory_bytes() + self.after.memory_bytes()
    }

    fn step(&self) -> HistoryStep {
        HistoryStep {
            layer_index: self.layer_index,
            region: self.region,
            description: self.description.clone(),
        }
    }
}

/// What an undo or redo just changed, so the caller can mark it dirty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryStep {
    pub layer_index: usize,
    /// In the layer's own pixel space.
    pub region: PixelRegion,
    pub description: String,
}

/// An operation in progress: a full copy of the target layer taken at
/// begin_patch, plus the area touched so far.
struct PendingPatch {
    layer_index: usize,
    rect: Rect,
    snapshot: PixelBuffer,
    description: String,
}

// ============================================================================
// HISTORY MANAGER - bounded undo/redo stacks of pixel patches
// ============================================================================

pub struct HistoryManager {
    undo_stack: VecDeque<HistoryPatch>,
    redo_stack: VecDeque<HistoryPatch>,
    max_history_size: usize,
    pending: Option<PendingPatch>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(50)
    }
}

impl HistoryManager {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size: max_history_size.max(1),
            pending: None,
            total_memory: 0,
        }
    }

    pub fn limit(&self) -> usize {
        self.max_history_size
    }

    // ---- recording ----------------------------------------------------------

    /// Start recording an operation on `layer_index`.  `rect` is the initial
    /// affected area in that layer's pixel space; it may grow via
    /// [`grow_patch`](Self::grow_patch).  An unfinished recording is
    /// finalised first.
    pub fn begin_patch(&mut self, layers: &[Layer], layer_index: usize, rect: Rect, description: &str) -> bool {
        if self.pending.is_some() {
            log_warn!("HistoryManager: begin_patch while a patch was open; finalising the old one");
            self.end_patch(layers);
        }
        let Some(layer) = layers.get(layer_index) else {
            return false;
        };
        self.pending = Some(PendingPatch {
            layer_index,
            rect,
            snapshot: layer.pixels.clone(),
            description: description.to_string(),
        });
        true
    }

    pub fn grow_patch(&mut self, rect: Rect) {
        if let Some(p) = self.pending.as_mut() {
            p.rect = p.rect.union(rect);
        }
    }

    /// Replace the pending rect with a tighter bound found after the fact
    /// (a fill only knows its extent once it has run).
    pub fn restrict_patch(&mut self, rect: Rect) {
        if let Some(p) = self.pending.as_mut() {
            p.rect = rect;
        }
    }

    pub fn is_recording(&self) -> bool {
        self.pending.is_some()
    }

    /// Clip the accumulated rect to the layer, capture after-pixels and push.
    /// Returns the committed region.  A layer that changed size gets a
    /// whole-buffer patch.
    pub fn end_patch(&mut self, layers: &[Layer]) -> Option<PixelRegion> {
        let pending = self.pending.take()?;
        let layer = layers.get(pending.layer_index)?;
        if layer.pixels.width() != pending.snapshot.width() || layer.pixels.height() != pending.snapshot.height() {
            log_info!(
                "History: layer {} resized during '{}' ({}x{} -> {}x{}); storing whole buffers",
                pending.layer_index,
                pending.description,
                pending.snapshot.width(),
                pending.snapshot.height(),
                layer.width(),
                layer.height()
            );
            let patch = HistoryPatch::whole_buffer(
                pending.description,
                pending.layer_index,
                pending.snapshot,
                layer.pixels.clone(),
            );
            let region = patch.region;
            self.push_patch(patch);
            return Some(region);
        }
        let region = PixelRegion::from_rect_clamped(pending.rect, layer.width(), layer.height())?;
        self.push_patch(HistoryPatch::from_buffers(
            pending.description,
            pending.layer_index,
            region,
            &pending.snapshot,
            &layer.pixels,
        ));
        Some(region)
    }

    /// Abandon the open recording without pushing anything.
    pub fn cancel_patch(&mut self) {
        self.pending = None;
    }

    /// Push a finished patch.  Clears the redo stack.
    pub fn push_patch(&mut self, patch: HistoryPatch) {
        for old in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(old.memory_size());
        }
        self.total_memory += patch.memory_size();
        self.undo_stack.push_back(patch);
        self.prune();
    }

    // ---- undo / redo --------------------------------------------------------

    pub fn undo(&mut self, layers: &mut [Layer]) -> Option<HistoryStep> {
        let patch = self.undo_stack.pop_back()?;
        patch.apply(layers, false);
        let step = patch.step();
        self.redo_stack.push_back(patch);
        while self.redo_stack.len() > self.max_history_size {
            if let Some(removed) = self.redo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        Some(step)
    }

    pub fn redo(&mut self, layers: &mut [Layer]) -> Option<HistoryStep> {
        let patch = self.redo_stack.pop_back()?;
        patch.apply(layers, true);
        let step = patch.step();
        self.undo_stack.push_back(patch);
        self.prune();
        Some(step)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|p| p.description.clone())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|p| p.description.clone())
    }

    /// Get all undo descriptions (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|p| p.description.clone()).collect()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.pending = None;
        self.total_memory = 0;
    }

    fn prune(&mut self) {
        let mut evicted = 0;
        while self.undo_stack.len() > self.max_history_size {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                evicted += 1;
            }
        }
        if evicted > 0 {
            log_info!("History: evicted {} oldest patch(es), limit {}", evicted, self.max_history_size);
        }
    }

    // ---- layer-stack bookkeeping ---------------------------------------------
    //
    // Patches address layers by index, so every structural change to the stack
    // must be reported here to keep stored indices pointing at the same layer.

    /// A layer was inserted at `index`; everything at or above shifts up.
    pub fn layer_inserted(&mut self, index: usize) {
        self.remap(|i| Some(if i >= index { i + 1 } else { i }));
    }

    /// The layer at `index` was removed.  Its patches are discarded.
    pub fn layer_removed(&mut self, index: usize) {
        self.remap(|i| match i.cmp(&index) {
            std::cmp::Ordering::Less => Some(i),
            std::cmp::Ordering::Equal => None,
            std::cmp::Ordering::Greater => Some(i - 1),
        });
    }

    pub fn layer_moved(&mut self, from: usize, to: usize) {
        self.remap(|i| Some(remap_moved_index(i, from, to)));
    }

    fn remap(&mut self, f: impl Fn(usize) -> Option<usize>) {
        let mut freed = 0;
        for stack in [&mut self.undo_stack, &mut self.redo_stack] {
            stack.retain_mut(|patch| match f(patch.layer_index) {
                Some(i) => {
                    patch.layer_index = i;
                    true
                }
                None => {
                    freed += patch.memory_size();
                    false
                }
            });
        }
        self.total_memory = self.total_memory.saturating_sub(freed);

        if let Some(p) = self.pending.as_mut() {
            match f(p.layer_index) {
                Some(i) => p.layer_index = i,
                None => self.pending = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::pos2;
    use image::Rgba;

    const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn layers(n: usize) -> Vec<Layer> {
        (0..n).map(|i| Layer::new(format!("L{}", i), 8, 8, CLEAR)).collect()
    }

    fn paint(layers: &mut [Layer], hist: &mut HistoryManager, idx: usize, x: u32, y: u32) {
        let r = Rect::from_min_max(pos2(x as f32, y as f32), pos2(x as f32 + 1.0, y as f32 + 1.0));
        hist.begin_patch(layers, idx, r, "Dot");
        layers[idx].pixels.put_pixel(x, y, RED);
        hist.end_patch(layers);
    }

    #[test]
    fn undo_then_redo_restores_pixels() {
        let mut ls = layers(1);
        let mut hist = HistoryManager::new(10);
        paint(&mut ls, &mut hist, 0, 3, 4);

        let step = hist.undo(&mut ls).unwrap();
        assert_eq!(step.layer_index, 0);
        assert_eq!(step.region, PixelRegion::new(3, 4, 1, 1));
        assert_eq!(ls[0].pixels.get_pixel(3, 4), CLEAR);

        hist.redo(&mut ls).unwrap();
        assert_eq!(ls[0].pixels.get_pixel(3, 4), RED);
        assert!(hist.redo(&mut ls).is_none());
    }

    #[test]
    fn new_patch_clears_redo() {
        let mut ls = layers(1);
        let mut hist = HistoryManager::new(10);
        paint(&mut ls, &mut hist, 0, 1, 1);
        hist.undo(&mut ls);
        assert!(hist.can_redo());
        paint(&mut ls, &mut hist, 0, 2, 2);
        assert!(!hist.can_redo());
    }

    #[test]
    fn stack_is_bounded_and_evicts_oldest() {
        let mut ls = layers(1);
        let mut hist = HistoryManager::new(3);
        for x in 0..5 {
            paint(&mut ls, &mut hist, 0, x, 0);
        }
        assert_eq!(hist.undo_count(), 3);
        while hist.undo(&mut ls).is_some() {}
        // The two oldest dots can no longer be undone
        assert_eq!(ls[0].pixels.get_pixel(0, 0), RED);
        assert_eq!(ls[0].pixels.get_pixel(1, 0), RED);
        assert_eq!(ls[0].pixels.get_pixel(2, 0), CLEAR);
    }

    #[test]
    fn grown_rect_is_clipped_to_layer() {
        let mut ls = layers(1);
        let mut hist = HistoryManager::new(10);
        hist.begin_patch(&ls, 0, Rect::from_min_max(pos2(-5.0, -5.0), pos2(2.0, 2.0)), "Stroke");
        hist.grow_patch(Rect::from_min_max(pos2(6.0, 6.0), pos2(20.0, 20.0)));
        ls[0].pixels.put_pixel(7, 7, RED);
        let region = hist.end_patch(&ls).unwrap();
        assert_eq!(region, PixelRegion::new(0, 0, 8, 8));
    }

    #[test]
    fn cancel_pushes_nothing() {
        let ls = layers(1);
        let mut hist = HistoryManager::new(10);
        hist.begin_patch(&ls, 0, Rect::from_min_max(pos2(0.0, 0.0), pos2(4.0, 4.0)), "Fill");
        hist.cancel_patch();
        assert!(!hist.is_recording());
        assert!(!hist.can_undo());
    }

    #[test]
    fn removing_a_layer_shifts_and_drops_patches() {
        let mut ls = layers(3);
        let mut hist = HistoryManager::new(10);
        paint(&mut ls, &mut hist, 1, 0, 0);
        paint(&mut ls, &mut hist, 2, 5, 5);

        ls.remove(1);
        hist.layer_removed(1);
        assert_eq!(hist.undo_count(), 1);

        let step = hist.undo(&mut ls).unwrap();
        assert_eq!(step.layer_index, 1);
        assert_eq!(ls[1].pixels.get_pixel(5, 5), CLEAR);
    }

    #[test]
    fn inserting_and_moving_layers_remaps_indices() {
        let mut ls = layers(2);
        let mut hist = HistoryManager::new(10);
        paint(&mut ls, &mut hist, 1, 2, 2);

        ls.insert(0, Layer::new("new", 8, 8, CLEAR));
        hist.layer_inserted(0);
        let moved = ls.remove(2);
        ls.insert(0, moved);
        hist.layer_moved(2, 0);

        let step = hist.undo(&mut ls).unwrap();
        assert_eq!(step.layer_index, 0);
        assert_eq!(ls[0].pixels.get_pixel(2, 2), CLEAR);
    }

    #[test]
    fn memory_tracks_both_stacks() {
        let mut ls = layers(1);
        let mut hist = HistoryManager::new(10);
        paint(&mut ls, &mut hist, 0, 0, 0);
        let one = hist.memory_usage();
        assert_eq!(one, 8);
        hist.undo(&mut ls);
        assert_eq!(hist.memory_usage(), one);
        hist.clear();
        assert_eq!(hist.memory_usage(), 0);
    }

    #[test]
    fn resizing_operation_swaps_whole_buffers() {
        let mut ls = vec![Layer::new("small", 4, 4, RED)];
        let mut hist = HistoryManager::new(10);
        hist.begin_patch(&ls, 0, ls[0].pixels.rect(), "Commit Transform");
        ls[0].pixels = PixelBuffer::new(8, 6);
        let region = hist.end_patch(&ls).unwrap();
        assert_eq!(region, PixelRegion::new(0, 0, 8, 6));
        assert_eq!(hist.undo_count(), 1);

        hist.undo(&mut ls).unwrap();
        assert_eq!((ls[0].width(), ls[0].height()), (4, 4));
        assert_eq!(ls[0].pixels.get_pixel(3, 3), RED);

        hist.redo(&mut ls).unwrap();
        assert_eq!((ls[0].width(), ls[0].height()), (8, 6));
        assert_eq!(ls[0].pixels.get_pixel(3, 3), CLEAR);
    }
}
