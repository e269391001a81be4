//! IoU-based tracker for maintaining person identity across frames.
//!
//! Uses greedy matching by Intersection over Union to associate detections
//! between consecutive frames; unmatched tracks age out after a gap.

use std::collections::HashMap;

use flowmap_models::PixelRect;

/// Track information.
#[derive(Debug, Clone)]
struct Track {
    /// Last known bounding box
    bbox: PixelRect,
    /// Frames since last detection
    age: u32,
}

/// Simple IoU-based tracker assigning stable track ids within one video.
pub struct IoUTracker {
    /// IoU threshold for matching
    iou_threshold: f32,
    /// Maximum gap frames before track deletion
    max_gap: u32,
    /// Active tracks
    tracks: HashMap<u32, Track>,
    /// Next track ID to assign
    next_track_id: u32,
}

impl IoUTracker {
    /// Create a new tracker.
    pub fn new(iou_threshold: f32, max_gap: u32) -> Self {
        Self {
            iou_threshold,
            max_gap,
            tracks: HashMap::new(),
            next_track_id: 1,
        }
    }

    /// Defaults tuned for person tracking at surveillance frame rates.
    pub fn for_persons() -> Self {
        Self::new(0.3, 30)
    }

    /// Update tracks with the detections of one frame.
    ///
    /// Returns `(track_id, bbox)` pairs for every supplied detection, with
    /// ids carried over from previous frames where the boxes overlap.
    pub fn update(&mut self, detections: &[(PixelRect, f32)]) -> Vec<(u32, PixelRect)> {
        if detections.is_empty() {
            let all: Vec<u32> = self.tracks.keys().copied().collect();
            self.age_tracks(&all);
            return Vec::new();
        }

        let mut matched = Vec::new();
        let mut unmatched_dets: Vec<usize> = (0..detections.len()).collect();
        let mut unmatched_tracks: Vec<u32> = self.tracks.keys().copied().collect();

        // Greedy matching by IoU
        let mut matches: Vec<(usize, u32)> = Vec::new();
        for (det_idx, (bbox, _score)) in detections.iter().enumerate() {
            let mut best_iou = self.iou_threshold;
            let mut best_track: Option<u32> = None;

            for &track_id in &unmatched_tracks {
                if let Some(track) = self.tracks.get(&track_id) {
                    let iou = bbox.iou(&track.bbox);
                    if iou > best_iou {
                        best_iou = iou;
                        best_track = Some(track_id);
                    }
                }
            }

            if let Some(track_id) = best_track {
                matches.push((det_idx, track_id));
                unmatched_dets.retain(|&idx| idx != det_idx);
                unmatched_tracks.retain(|&id| id != track_id);
            }
        }

        // Update matched tracks
        for (det_idx, track_id) in matches {
            let (bbox, _score) = detections[det_idx];
            self.tracks.insert(track_id, Track { bbox, age: 0 });
            matched.push((track_id, bbox));
        }

        // Create new tracks for unmatched detections
        for det_idx in unmatched_dets {
            let (bbox, _score) = detections[det_idx];
            let track_id = self.next_track_id;
            self.next_track_id += 1;

            self.tracks.insert(track_id, Track { bbox, age: 0 });
            matched.push((track_id, bbox));
        }

        // Age unmatched tracks
        self.age_tracks(&unmatched_tracks);

        matched
    }

    fn age_tracks(&mut self, track_ids: &[u32]) {
        let mut to_remove = Vec::new();
        for &track_id in track_ids {
            if let Some(track) = self.tracks.get_mut(&track_id) {
                track.age += 1;
                if track.age > self.max_gap {
                    to_remove.push(track_id);
                }
            }
        }
        for id in to_remove {
            self.tracks.remove(&id);
        }
    }

    /// Number of currently live tracks.
    pub fn active_tracks(&self) -> usize {
        self.tracks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x: f32, y: f32) -> PixelRect {
        PixelRect::new(x, y, x + 40.0, y + 80.0)
    }

    #[test]
    fn test_identity_carries_across_frames() {
        let mut tracker = IoUTracker::for_persons();

        let first = tracker.update(&[(rect(100.0, 100.0), 0.9)]);
        assert_eq!(first.len(), 1);
        let id = first[0].0;

        // Slight movement keeps the same id
        let second = tracker.update(&[(rect(104.0, 102.0), 0.9)]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].0, id);
    }

    #[test]
    fn test_distinct_people_get_distinct_ids() {
        let mut tracker = IoUTracker::for_persons();
        let tracked = tracker.update(&[(rect(0.0, 0.0), 0.9), (rect(500.0, 200.0), 0.8)]);
        assert_eq!(tracked.len(), 2);
        assert_ne!(tracked[0].0, tracked[1].0);
    }

    #[test]
    fn test_tracks_age_out() {
        let mut tracker = IoUTracker::new(0.3, 2);
        tracker.update(&[(rect(0.0, 0.0), 0.9)]);
        assert_eq!(tracker.active_tracks(), 1);

        for _ in 0..3 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.active_tracks(), 0);

        // A re-appearing person gets a fresh id
        let tracked = tracker.update(&[(rect(0.0, 0.0), 0.9)]);
        assert_eq!(tracked[0].0, 2);
    }

    #[test]
    fn test_empty_update_returns_nothing() {
        let mut tracker = IoUTracker::for_persons();
        assert!(tracker.update(&[]).is_empty());
    }
}
