use gstreamer::prelude::*;

//Manually copy/pasted from https://gstreamer.freedesktop.org/documentation/nvcodec/?gi-language=c
static NVIDIA_GPU_CODECS: [&str; 13] = [
    "nvav1dec",
    "nvh264dec",
    "nvh264sldec",
    "nvh265dec",
    "nvh265sldec",
    "nvjpegdec",
    "nvmpeg2videodec",
    "nvmpeg4videodec",
    "nvmpegvideodec",
    "nvvp8dec",
    "nvvp8sldec",
    "nvvp9dec",
    "nvvp9sldec",
];

/// Make gstreamer prefer using your Nvidia GPU to decode video files.
/// Has no effect if you do not have an Nvidia GPU or the nvcodec plugin is not installed.
/// Returns the number of decoders that were promoted.
pub fn prioritize_nvidia_gpu_decoding() -> Result<usize, glib::Error> {
    crate::init_gstreamer()?;
    Ok(set_nvidia_rank(gstreamer::Rank::PRIMARY + 1))
}

fn set_nvidia_rank(rank: gstreamer::Rank) -> usize {
    let registry = gstreamer::Registry::get();

    let mut num_changed = 0;
    for codec in NVIDIA_GPU_CODECS {
        if let Some(feature) = registry.lookup_feature(codec) {
            feature.set_rank(rank);
            num_changed += 1;
        }
    }
    num_changed
}
