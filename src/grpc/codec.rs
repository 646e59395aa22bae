//! Dynamic message codec.
//!
//! Bridges `prost_reflect::DynamicMessage` into tonic's codec seam so calls
//! can be made against methods that only exist as descriptors.

use prost::Message;
use prost_reflect::{DynamicMessage, MethodDescriptor};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

/// Codec that encodes and decodes `DynamicMessage`s for one method.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    method: MethodDescriptor,
}

impl DynamicCodec {
    pub fn new(method: MethodDescriptor) -> Self {
        Self { method }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicCodec;
    type Decoder = DynamicCodec;

    fn encoder(&mut self) -> Self::Encoder {
        self.clone()
    }

    fn decoder(&mut self) -> Self::Decoder {
        self.clone()
    }
}

impl Encoder for DynamicCodec {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: DynamicMessage, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        item.encode(dst)
            .map_err(|err| Status::internal(format!("failed to encode message: {err}")))
    }
}

impl Decoder for DynamicCodec {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<DynamicMessage>, Status> {
        let message = DynamicMessage::decode(self.method.output(), src)
            .map_err(|err| Status::internal(format!("failed to decode message: {err}")))?;
        Ok(Some(message))
    }
}
