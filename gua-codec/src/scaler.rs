use ffmpeg_next::{
    format::Pixel,
    software::scaling::{self, flag::Flags},
};

/// Converts decoded frames the still encoder cannot consume into YUV420P at the
/// same size. Rebuilt when the source geometry changes.
pub struct Scaler {
    context: scaling::Context,
    src: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(format: Pixel, width: u32, height: u32) -> anyhow::Result<Self> {
        let context = scaling::Context::get(
            format,
            width,
            height,
            Pixel::YUV420P,
            width,
            height,
            Flags::BILINEAR,
        )?;
        Ok(Self {
            context,
            src: (format, width, height),
        })
    }

    pub fn matches(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        self.src == (frame.format(), frame.width(), frame.height())
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst = ffmpeg_next::frame::Video::empty();
        self.context.run(frame, &mut dst)?;
        dst.set_pts(frame.pts());
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
