//! # Feature Layout
//!
//! The motion model emits 133 channels per frame. The body model wants a
//! 169-wide pose vector, of which the first 36 entries are parameters the
//! model never predicts. Those are filled with zeros and the resulting
//! vector is cut into six named segments.
//!
//! The offsets below must match the channel order the model was trained
//! with. A drift here silently corrupts every pose, so the table is
//! validated once at startup against the normalization width.

use crate::error::{GenerationError, LoadError};
use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, Axis};

pub const MODEL_FEATURE_DIM: usize = 133;
pub const ZERO_PREFIX_WIDTH: usize = 36;
pub const POSE_PARAM_WIDTH: usize = ZERO_PREFIX_WIDTH + MODEL_FEATURE_DIM; // 169

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    RootPose,
    BodyPose,
    LeftHandPose,
    RightHandPose,
    JawPose,
    Expression,
}

impl Segment {
    pub const COUNT: usize = 6;
    pub const ALL: [Segment; Segment::COUNT] = [
        Segment::RootPose,
        Segment::BodyPose,
        Segment::LeftHandPose,
        Segment::RightHandPose,
        Segment::JawPose,
        Segment::Expression,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Segment::RootPose => "root_pose",
            Segment::BodyPose => "body_pose",
            Segment::LeftHandPose => "lhand_pose",
            Segment::RightHandPose => "rhand_pose",
            Segment::JawPose => "jaw_pose",
            Segment::Expression => "expression",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentSpec {
    pub segment: Segment,
    pub offset: usize,
    pub width: usize,
}

impl SegmentSpec {
    pub const fn new(segment: Segment, offset: usize, width: usize) -> Self {
        Self { segment, offset, width }
    }

    pub fn end(&self) -> usize {
        self.offset + self.width
    }
}

/// SMPL-X ordering used by the sign-language motion model.
pub const SMPLX_SEGMENTS: [SegmentSpec; Segment::COUNT] = [
    SegmentSpec::new(Segment::RootPose, 0, 3),
    SegmentSpec::new(Segment::BodyPose, 3, 63),
    SegmentSpec::new(Segment::LeftHandPose, 66, 45),
    SegmentSpec::new(Segment::RightHandPose, 111, 45),
    SegmentSpec::new(Segment::JawPose, 156, 3),
    SegmentSpec::new(Segment::Expression, 159, 10),
];

/// Pose parameters of a single frame, one sub-vector per `Segment`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    segments: [Array1<f32>; Segment::COUNT],
}

impl DecodedFrame {
    pub fn new(segments: [Array1<f32>; Segment::COUNT]) -> Self {
        Self { segments }
    }

    pub fn segment(&self, segment: Segment) -> ArrayView1<'_, f32> {
        self.segments[segment.index()].view()
    }

    pub fn root_pose(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::RootPose)
    }

    pub fn body_pose(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::BodyPose)
    }

    pub fn lhand_pose(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::LeftHandPose)
    }

    pub fn rhand_pose(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::RightHandPose)
    }

    pub fn jaw_pose(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::JawPose)
    }

    pub fn expression(&self) -> ArrayView1<'_, f32> {
        self.segment(Segment::Expression)
    }
}

#[derive(Debug, Clone)]
pub struct FeatureLayout {
    prefix_width: usize,
    segments: Vec<SegmentSpec>,
}

impl Default for FeatureLayout {
    fn default() -> Self {
        Self::smplx()
    }
}

impl FeatureLayout {
    pub fn new(prefix_width: usize, segments: Vec<SegmentSpec>) -> Self {
        Self { prefix_width, segments }
    }

    pub fn smplx() -> Self {
        Self::new(ZERO_PREFIX_WIDTH, SMPLX_SEGMENTS.to_vec())
    }

    pub fn prefix_width(&self) -> usize {
        self.prefix_width
    }

    pub fn segments(&self) -> &[SegmentSpec] {
        &self.segments
    }

    /// Full pose vector width once the zero prefix is in place.
    pub fn total_width(&self) -> usize {
        self.segments.iter().map(SegmentSpec::end).max().unwrap_or(0)
    }

    pub fn width_of(&self, segment: Segment) -> Option<usize> {
        self.segments.iter().find(|spec| spec.segment == segment).map(|spec| spec.width)
    }

    /// Checks the table against the model's declared output width.
    ///
    /// Segments must start at 0, be contiguous and non-overlapping, name every
    /// `Segment` exactly once, and end at `prefix_width + model_width`.
    pub fn validate(&self, model_width: usize) -> Result<(), LoadError> {
        let mut sorted = self.segments.clone();
        sorted.sort_by_key(|spec| spec.offset);

        for segment in Segment::ALL {
            let count = sorted.iter().filter(|spec| spec.segment == segment).count();
            if count != 1 {
                return Err(LoadError::Layout(format!(
                    "segment '{}' appears {} times",
                    segment.name(),
                    count
                )));
            }
        }

        let mut cursor = 0;
        for spec in &sorted {
            if spec.width == 0 {
                return Err(LoadError::Layout(format!("segment '{}' is empty", spec.segment.name())));
            }
            if spec.offset != cursor {
                return Err(LoadError::Layout(format!(
                    "segment '{}' starts at {} but previous segment ends at {}",
                    spec.segment.name(),
                    spec.offset,
                    cursor
                )));
            }
            cursor = spec.end();
        }

        let expected = self.prefix_width + model_width;
        if cursor != expected {
            return Err(LoadError::Layout(format!(
                "segments cover {} channels, expected {} ({} zero prefix + {} model channels)",
                cursor, expected, self.prefix_width, model_width
            )));
        }
        Ok(())
    }

    /// Splits a (T, model_width) raw feature tensor into T frames, in order.
    pub fn decode(&self, features: &Array2<f32>) -> Result<Vec<DecodedFrame>, GenerationError> {
        let total = self.total_width();
        if features.ncols() + self.prefix_width != total {
            return Err(GenerationError::Configuration(format!(
                "feature tensor has {} channels, layout expects {}",
                features.ncols(),
                total.saturating_sub(self.prefix_width)
            )));
        }

        let num_frames = features.nrows();
        let prefix = Array2::<f32>::zeros((num_frames, self.prefix_width));
        let full = ndarray::concatenate(Axis(1), &[prefix.view(), features.view()])
            .map_err(|e| GenerationError::Configuration(e.to_string()))?;
        assert_eq!(full.ncols(), total, "reconstructed pose width");

        let mut columns: Vec<Option<ArrayView2<f32>>> = vec![None; Segment::COUNT];
        for spec in &self.segments {
            columns[spec.segment.index()] = Some(full.slice(s![.., spec.offset..spec.end()]));
        }
        let columns: Vec<ArrayView2<f32>> = columns
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| GenerationError::Configuration("layout is missing a segment".to_string()))?;

        Ok((0..num_frames)
            .map(|t| DecodedFrame::new(std::array::from_fn(|i| columns[i].row(t).to_owned())))
            .collect())
    }
}
