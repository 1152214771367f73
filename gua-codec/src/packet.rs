use bytes::Bytes;

/// Output of an encode context. Owned by the pipeline invocation until it is
/// handed to the consumer.
#[derive(Clone, Debug)]
pub struct EncodedPacket {
    data: Bytes,
    pts: Option<i64>,
    is_key: bool,
}

impl EncodedPacket {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pts: None,
            is_key: true,
        }
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}
