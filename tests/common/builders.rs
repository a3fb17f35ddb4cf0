//! Test data builders for graphs and frames

use stream_engine::pipeline::{BusFrame, ChannelMap, FramePayload, FrameType, GraphDef, NodeDef};

/// Builder for EEG frames carrying several channels
pub struct EegFrameBuilder {
    source_id: String,
    timestamp: u64,
    sample_rate_hz: f32,
    channels: ChannelMap,
}

impl EegFrameBuilder {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            timestamp: 0,
            sample_rate_hz: 256.0,
            channels: ChannelMap::new(),
        }
    }

    pub fn timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn channel(mut self, name: &str, samples: Vec<f32>) -> Self {
        self.channels.insert(name.to_string(), samples);
        self
    }

    pub fn build(self) -> BusFrame {
        BusFrame::new(
            self.timestamp,
            self.source_id,
            FrameType::Eeg,
            FramePayload::channels(self.sample_rate_hz, self.channels),
        )
    }
}

/// `source → reciprocal → scale(gain)`, with the source emitting `values`
pub fn reciprocal_chain(values: Vec<f64>, gain: f64) -> GraphDef {
    GraphDef::new("reciprocal-chain")
        .node(
            NodeDef::source("seq")
                .op("sequence")
                .with("values", values),
        )
        .node(NodeDef::transform("recip").op("reciprocal").input("seq"))
        .node(
            NodeDef::transform("scaled")
                .op("scale")
                .with("gain", gain)
                .input("recip"),
        )
}

/// Bus source for `source_id` feeding a coherence node
pub fn coherence_graph(source_id: &str) -> GraphDef {
    GraphDef::new("coherence")
        .node(NodeDef::source("eeg").with("source_id", source_id))
        .node(NodeDef::transform("coh").op("coherence").input("eeg"))
        .node(NodeDef::transform("sync").op("global_sync").input("coh"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eeg_frame_builder() {
        let frame = EegFrameBuilder::new("eeg")
            .timestamp(5)
            .channel("Fz", vec![0.0; 4])
            .build();

        assert_eq!(frame.source_id, "eeg");
        assert_eq!(frame.timestamp, 5);
        assert_eq!(frame.frame_type, FrameType::Eeg);
    }
}
