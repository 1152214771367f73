use std::fmt::{Display, Formatter};

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0, limited range.
    Yuv420p,
    /// Planar YUV 4:2:0, full (JPEG) range.
    Yuvj420p,
    Yuv422p,
    Yuvj422p,
    /// Y plane followed by an interleaved UV plane, 4:2:0.
    Nv12,
    Rgb24,
    Bgr24,
    Gray8,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420p
            | PixelFormat::Yuvj420p
            | PixelFormat::Yuv422p
            | PixelFormat::Yuvj422p => 3,
            PixelFormat::Nv12 => 2,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8 => 1,
        }
    }

    pub fn is_full_range(&self) -> bool {
        matches!(self, PixelFormat::Yuvj420p | PixelFormat::Yuvj422p)
    }

    pub fn is_yuv(&self) -> bool {
        !matches!(
            self,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 | PixelFormat::Gray8
        )
    }

    /// log2 of the horizontal and vertical chroma subsampling.
    pub fn chroma_shift(&self) -> (u32, u32) {
        match self {
            PixelFormat::Yuv420p | PixelFormat::Yuvj420p | PixelFormat::Nv12 => (1, 1),
            PixelFormat::Yuv422p | PixelFormat::Yuvj422p => (1, 0),
            _ => (0, 0),
        }
    }

    /// Minimum bytes per row and number of rows of plane `index`.
    fn plane_extent(&self, index: usize, width: usize, height: usize) -> (usize, usize) {
        let (sx, sy) = self.chroma_shift();
        let chroma_w = (width + (1 << sx) - 1) >> sx;
        let chroma_h = (height + (1 << sy) - 1) >> sy;
        match (self, index) {
            (PixelFormat::Rgb24 | PixelFormat::Bgr24, _) => (width * 3, height),
            (_, 0) => (width, height),
            (PixelFormat::Nv12, _) => (chroma_w * 2, chroma_h),
            _ => (chroma_w, chroma_h),
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        let name = match self {
            PixelFormat::Yuv420p => "yuv420p",
            PixelFormat::Yuvj420p => "yuvj420p",
            PixelFormat::Yuv422p => "yuv422p",
            PixelFormat::Yuvj422p => "yuvj422p",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Gray8 => "gray8",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Plane {
    data: Bytes,
    stride: usize,
}

impl Plane {
    pub fn new(data: impl Into<Bytes>, stride: usize) -> Self {
        Self {
            data: data.into(),
            stride,
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..(start + self.stride).min(self.data.len())]
    }
}

/// A decoded picture that owns its pixel data. Planes are validated against the
/// pixel format on construction, so row access never goes out of bounds.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    planes: Vec<Plane>,
    pts: Option<i64>,
    is_key: bool,
}

impl VideoFrame {
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        planes: Vec<Plane>,
    ) -> anyhow::Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }
        if planes.len() < format.plane_count() {
            anyhow::bail!(
                "{} needs {} planes, got {}",
                format,
                format.plane_count(),
                planes.len()
            );
        }
        for (index, plane) in planes.iter().take(format.plane_count()).enumerate() {
            let (row_len, rows) = format.plane_extent(index, width as usize, height as usize);
            if plane.stride < row_len {
                anyhow::bail!(
                    "plane {} stride {} shorter than row length {}",
                    index,
                    plane.stride,
                    row_len
                );
            }
            let needed = plane.stride * (rows - 1) + row_len;
            if plane.data.len() < needed {
                anyhow::bail!(
                    "plane {} holds {} bytes, needs {}",
                    index,
                    plane.data.len(),
                    needed
                );
            }
        }
        Ok(Self {
            width,
            height,
            format,
            planes,
            pts: None,
            is_key: false,
        })
    }

    pub fn with_pts(mut self, pts: Option<i64>) -> Self {
        self.pts = pts;
        self
    }

    pub fn with_key(mut self, is_key: bool) -> Self {
        self.is_key = is_key;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn is_key(&self) -> bool {
        self.is_key
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame width: {}, height: {}, format: {}, pts: {:?}, is_key: {}",
            self.width, self.height, self.format, self.pts, self.is_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yuv420(width: usize, height: usize) -> Vec<Plane> {
        let cw = width.div_ceil(2);
        let ch = height.div_ceil(2);
        vec![
            Plane::new(vec![16u8; width * height], width),
            Plane::new(vec![128u8; cw * ch], cw),
            Plane::new(vec![128u8; cw * ch], cw),
        ]
    }

    #[test]
    fn test_new_frame_validates_planes() {
        let frame = VideoFrame::new(4, 2, PixelFormat::Yuv420p, yuv420(4, 2)).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.plane(1).stride(), 2);

        let err = VideoFrame::new(4, 2, PixelFormat::Yuv420p, yuv420(4, 2)[..2].to_vec());
        assert!(err.is_err());

        let short = vec![Plane::new(vec![0u8; 5], 3)];
        assert!(VideoFrame::new(2, 2, PixelFormat::Rgb24, short).is_err());
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let frame = VideoFrame::new(3, 3, PixelFormat::Yuv420p, yuv420(3, 3));
        assert!(frame.is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(VideoFrame::new(0, 2, PixelFormat::Gray8, vec![Plane::new(vec![], 0)]).is_err());
    }

    #[test]
    fn test_row_respects_stride() {
        let plane = Plane::new(vec![1, 2, 3, 0, 4, 5, 6, 0], 4);
        assert_eq!(&plane.row(1)[..3], &[4, 5, 6]);
    }
}
