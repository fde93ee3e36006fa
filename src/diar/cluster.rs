//! Online and offline speaker clustering.
//!
//! The online clusterer assigns embeddings to centroids as they arrive,
//! with hysteresis: staying with the current speaker is cheap, switching
//! requires clearly better evidence plus a minimum dwell time, and new
//! speakers are only created when nothing matches and there is room. Naive
//! nearest-centroid assignment oscillates at turn boundaries; the
//! stay/switch/create structure trades slightly delayed switch detection
//! for stable labels.
//!
//! The offline pass re-clusters a full frame sequence from scratch in one
//! greedy sweep and backs the terminal speaker reassignment.

use crate::defaults;
use crate::diar::embedder::l2_normalize;
use crate::diar::frames::SpeakerFrame;

/// Cosine similarity of two vectors, in [-1, 1]. Mismatched or empty
/// inputs yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x as f64 * y as f64;
        na += x as f64 * x as f64;
        nb += y as f64 * y as f64;
    }
    if na <= 0.0 || nb <= 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt() + 1e-8)) as f32
}

/// One speaker assignment decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assignment {
    /// Assigned speaker index, or -1 if no assignment was possible.
    pub speaker_id: i32,
    /// Similarity to the chosen centroid, clamped to [0, 1].
    pub confidence: f32,
}

#[derive(Debug, Clone)]
struct Centroid {
    embedding: Vec<f32>,
    count: u64,
}

/// Online centroid clusterer with hysteresis.
#[derive(Debug)]
pub struct SpeakerClusterer {
    centroids: Vec<Centroid>,
    max_speakers: usize,
    threshold: f32,
    current: i32,
    frames_since_change: u32,
}

impl SpeakerClusterer {
    pub fn new(max_speakers: usize, threshold: f32) -> Self {
        Self {
            centroids: Vec::new(),
            max_speakers: max_speakers.max(1),
            threshold,
            current: -1,
            frames_since_change: 0,
        }
    }

    /// Number of speakers observed so far.
    pub fn speaker_count(&self) -> usize {
        self.centroids.len()
    }

    /// The speaker assigned most recently.
    pub fn current_speaker(&self) -> i32 {
        self.current
    }

    /// Adjust the speaker cap mid-session. Existing centroids are kept even
    /// if the cap drops below their count; only creation is limited.
    pub fn set_max_speakers(&mut self, max_speakers: usize) {
        self.max_speakers = max_speakers.max(1);
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold;
    }

    /// Forget all state for a fresh session.
    pub fn reset(&mut self) {
        self.centroids.clear();
        self.current = -1;
        self.frames_since_change = 0;
    }

    /// Assign an embedding to a speaker.
    ///
    /// Rule order: seed the first centroid; stay with the current speaker
    /// while its similarity holds; switch only to a clearly better existing
    /// speaker after the dwell time; create a new speaker only when there is
    /// room and nothing matches; otherwise stay put.
    pub fn assign(&mut self, embedding: &[f32]) -> Assignment {
        if embedding.is_empty() {
            return Assignment {
                speaker_id: self.current,
                confidence: 0.0,
            };
        }

        // First embedding seeds speaker 0
        if self.centroids.is_empty() {
            self.centroids.push(Centroid {
                embedding: embedding.to_vec(),
                count: 1,
            });
            self.current = 0;
            self.frames_since_change = 0;
            return Assignment {
                speaker_id: 0,
                confidence: 1.0,
            };
        }

        let similarities: Vec<f32> = self
            .centroids
            .iter()
            .map(|c| cosine_similarity(embedding, &c.embedding))
            .collect();

        let (best, best_sim) = similarities
            .iter()
            .enumerate()
            .fold((0usize, f32::MIN), |(bi, bs), (i, &s)| {
                if s > bs { (i, s) } else { (bi, bs) }
            });

        if self.current >= 0 && (self.current as usize) < similarities.len() {
            let current_idx = self.current as usize;
            let current_sim = similarities[current_idx];

            // Stay: current speaker still plausible
            if current_sim >= self.threshold {
                self.update_centroid(current_idx, embedding);
                self.frames_since_change += 1;
                return Assignment {
                    speaker_id: self.current,
                    confidence: current_sim.clamp(0.0, 1.0),
                };
            }

            // Switch: clearly better existing speaker, after minimum dwell
            if best != current_idx
                && best_sim > current_sim + defaults::SWITCH_MARGIN
                && self.frames_since_change >= defaults::MIN_FRAMES_BEFORE_SWITCH
            {
                self.current = best as i32;
                self.frames_since_change = 0;
                return Assignment {
                    speaker_id: self.current,
                    confidence: best_sim.clamp(0.0, 1.0),
                };
            }

            // Create: room available and nothing convincing to join
            if self.centroids.len() < self.max_speakers
                && best_sim < self.threshold + defaults::NEW_SPEAKER_MARGIN
                && self.frames_since_change >= defaults::MIN_FRAMES_BEFORE_SWITCH
            {
                self.centroids.push(Centroid {
                    embedding: embedding.to_vec(),
                    count: 1,
                });
                self.current = (self.centroids.len() - 1) as i32;
                self.frames_since_change = 0;
                return Assignment {
                    speaker_id: self.current,
                    confidence: 1.0,
                };
            }

            // Stay even on a marginal match
            self.frames_since_change += 1;
            return Assignment {
                speaker_id: self.current,
                confidence: current_sim.clamp(0.0, 1.0),
            };
        }

        // No current speaker: join the best match if acceptable
        if best_sim >= self.threshold {
            self.current = best as i32;
            self.frames_since_change = 0;
            return Assignment {
                speaker_id: self.current,
                confidence: best_sim.clamp(0.0, 1.0),
            };
        }

        if self.centroids.len() < self.max_speakers {
            self.centroids.push(Centroid {
                embedding: embedding.to_vec(),
                count: 1,
            });
            self.current = (self.centroids.len() - 1) as i32;
            self.frames_since_change = 0;
            return Assignment {
                speaker_id: self.current,
                confidence: 1.0,
            };
        }

        self.current = best as i32;
        self.frames_since_change = 0;
        Assignment {
            speaker_id: self.current,
            confidence: best_sim.clamp(0.0, 1.0),
        }
    }

    fn update_centroid(&mut self, idx: usize, embedding: &[f32]) {
        let alpha = defaults::CENTROID_LEARNING_RATE;
        let centroid = &mut self.centroids[idx];
        for (c, &e) in centroid.embedding.iter_mut().zip(embedding.iter()) {
            *c = (1.0 - alpha) * *c + alpha * e;
        }
        l2_normalize(&mut centroid.embedding);
        centroid.count += 1;
    }
}

/// Offline re-clustering over a full frame sequence.
///
/// Single greedy pass in time order: the first frame seeds cluster 0, each
/// subsequent frame joins its best cluster (running-mean centroid update)
/// or seeds a new one when nothing reaches `threshold` and there is room.
/// Writes each frame's `speaker_id` and `confidence`; returns the cluster
/// count. Seeding in time order keeps cluster 0 the first-observed speaker,
/// so ids line up with the online labels in the common case.
pub fn recluster_frames(
    frames: &mut [SpeakerFrame],
    max_speakers: usize,
    threshold: f32,
) -> usize {
    let max_speakers = max_speakers.max(1);
    let mut centroids: Vec<Centroid> = Vec::new();

    for frame in frames.iter_mut() {
        if frame.embedding.is_empty() {
            frame.speaker_id = -1;
            frame.confidence = 0.0;
            continue;
        }

        if centroids.is_empty() {
            centroids.push(Centroid {
                embedding: frame.embedding.clone(),
                count: 1,
            });
            frame.speaker_id = 0;
            frame.confidence = 1.0;
            continue;
        }

        let (best, best_sim) = centroids
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&frame.embedding, &c.embedding)))
            .fold((0usize, f32::MIN), |(bi, bs), (i, s)| {
                if s > bs { (i, s) } else { (bi, bs) }
            });

        if best_sim < threshold && centroids.len() < max_speakers {
            centroids.push(Centroid {
                embedding: frame.embedding.clone(),
                count: 1,
            });
            frame.speaker_id = (centroids.len() - 1) as i32;
            frame.confidence = 1.0;
        } else {
            let centroid = &mut centroids[best];
            let count = centroid.count as f32;
            for (c, &e) in centroid.embedding.iter_mut().zip(frame.embedding.iter()) {
                *c = (*c * count + e) / (count + 1.0);
            }
            l2_normalize(&mut centroid.embedding);
            centroid.count += 1;
            frame.speaker_id = best as i32;
            frame.confidence = best_sim.clamp(0.0, 1.0);
        }
    }

    centroids.len()
}
