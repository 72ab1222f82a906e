use std::fmt;

/// The five segments a Qwen2-VL style export is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentKind {
    /// Pixel tensor to image embedding. One-shot.
    VisionEncoder,
    /// Token ids to hidden states. Resident.
    TextEmbedder,
    /// Produces text-only position ids. Resident.
    PositionIds,
    /// Splices the image embedding into the text hidden states. One-shot.
    VisionMerger,
    /// One autoregressive step over the key/value cache. Resident.
    Decoder,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 5] = [
        SegmentKind::VisionEncoder,
        SegmentKind::TextEmbedder,
        SegmentKind::PositionIds,
        SegmentKind::VisionMerger,
        SegmentKind::Decoder,
    ];

    /// Letter used in exported segment file names.
    pub fn tag(self) -> &'static str {
        match self {
            SegmentKind::VisionEncoder => "A",
            SegmentKind::TextEmbedder => "B",
            SegmentKind::PositionIds => "C",
            SegmentKind::VisionMerger => "D",
            SegmentKind::Decoder => "E",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn name(self) -> &'static str {
        match self {
            SegmentKind::VisionEncoder => "vision-encoder",
            SegmentKind::TextEmbedder => "text-embedder",
            SegmentKind::PositionIds => "position-ids",
            SegmentKind::VisionMerger => "vision-merger",
            SegmentKind::Decoder => "decoder",
        }
    }

    /// Resident segments are used every decode step and cached; the others
    /// are leased for a single request.
    pub fn is_resident(self) -> bool {
        matches!(
            self,
            SegmentKind::TextEmbedder | SegmentKind::PositionIds | SegmentKind::Decoder
        )
    }

    pub fn resident() -> impl Iterator<Item = SegmentKind> {
        Self::ALL.into_iter().filter(|kind| kind.is_resident())
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.tag())
    }
}
