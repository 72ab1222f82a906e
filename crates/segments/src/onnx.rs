//! ONNX segment backend built on `candle-onnx`.

use candle_onnx::onnx::ModelProto;
use prost::Message;

use crate::errors::SegmentError;
use crate::kind::SegmentKind;
use crate::tensors::TensorMap;
use crate::{Segment, SegmentRuntime};

/// Parses ONNX protobuf bytes into evaluable segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxRuntime;

impl SegmentRuntime for OnnxRuntime {
    fn instantiate(
        &self,
        kind: SegmentKind,
        bytes: Vec<u8>,
    ) -> Result<Box<dyn Segment>, SegmentError> {
        let model = parse_model(kind, &bytes)?;
        Ok(Box::new(OnnxSegment { kind, model }))
    }
}

/// A parsed ONNX graph evaluated with candle's reference interpreter.
pub struct OnnxSegment {
    kind: SegmentKind,
    model: ModelProto,
}

impl Segment for OnnxSegment {
    fn run(&self, inputs: TensorMap) -> Result<TensorMap, SegmentError> {
        let outputs = candle_onnx::simple_eval(&self.model, inputs.into_inner()).map_err(|err| {
            SegmentError::Run {
                kind: self.kind,
                message: err.to_string(),
            }
        })?;
        Ok(TensorMap::from(outputs))
    }
}

fn parse_model(kind: SegmentKind, bytes: &[u8]) -> Result<ModelProto, SegmentError> {
    if bytes.is_empty() {
        return Err(SegmentError::Parse {
            kind,
            message: "segment payload is empty".to_string(),
        });
    }
    let model = ModelProto::decode(bytes).map_err(|err| SegmentError::Parse {
        kind,
        message: err.to_string(),
    })?;
    if model.graph.is_none() {
        return Err(SegmentError::Parse {
            kind,
            message: "model has no graph".to_string(),
        });
    }
    Ok(model)
}
