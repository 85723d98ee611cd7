//! ffmpeg argument lists.

use std::path::Path;

use crate::config::{StreamConfig, Transport, VideoMode};

/// Arguments that pull `source_url` and write a live HLS playlist plus
/// `stream_<n>.ts` segments into `output_dir`.
pub fn hls_args(
    source_url: &str,
    config: &StreamConfig,
    output_dir: &Path,
    playlist_name: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into(), "-y".into()];
    args.extend(input_args(source_url, config.transport));

    match config.video {
        VideoMode::Copy => args.extend(["-c:v", "copy"].map(String::from)),
        VideoMode::H264 => {
            args.extend(
                ["-c:v", "libx264", "-tune", "zerolatency", "-pix_fmt", "yuv420p"]
                    .map(String::from),
            );
            args.extend([
                "-preset".to_string(),
                config.preset.clone(),
                "-crf".to_string(),
                config.crf.to_string(),
                // Keyframe at every segment boundary so each segment starts cleanly
                "-force_key_frames".to_string(),
                format!("expr:gte(t,n_forced*{})", config.segment_secs),
            ]);
            if let Some(height) = config.max_height {
                args.extend(["-vf".to_string(), format!("scale=-2:'min({height},ih)'")]);
            }
        }
    }

    if config.audio {
        args.extend(["-c:a", "aac", "-b:a", "128k", "-ac", "2"].map(String::from));
    } else {
        args.push("-an".to_string());
    }

    args.extend([
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        config.segment_secs.to_string(),
        "-hls_list_size".to_string(),
        config.list_size.to_string(),
        "-hls_flags".to_string(),
        "delete_segments+omit_endlist".to_string(),
        "-hls_segment_filename".to_string(),
        output_dir.join("stream_%d.ts").to_string_lossy().into_owned(),
        output_dir.join(playlist_name).to_string_lossy().into_owned(),
    ]);
    args
}

/// Arguments for a short connectivity check: decode one video frame, discard it.
pub fn probe_transcode_args(source_url: &str, transport: Transport) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into()];
    args.extend(input_args(source_url, transport));
    args.extend(["-frames:v", "1", "-f", "null", "-"].map(String::from));
    args
}

fn input_args(source_url: &str, transport: Transport) -> Vec<String> {
    let mut args = Vec::new();
    if transport == Transport::Tcp {
        args.extend(["-rtsp_transport", "tcp"].map(String::from));
    }
    args.extend(["-i".to_string(), source_url.to_string()]);
    args
}
