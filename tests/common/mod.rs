//! Fake transcoders for exercising the session lifecycle without ffmpeg.
//!
//! Each fake is `/bin/sh -c <script> sh`, so the real argument list lands in
//! `$1..$N`: `-version` for the probe, the HLS arguments otherwise, with the
//! playlist path last.

#![allow(dead_code)]

use hls_relay::config::Settings;
use std::path::Path;

const PARSE_ARGS: &str = r#"
case "$1" in -version) echo 'ffmpeg version 6.1-fake Copyright (c) 2000-2023'; exit 0;; esac
prev=""
for a; do
  if [ "$prev" = "-i" ]; then src="$a"; fi
  prev="$a"; last="$a"
done
dir=$(dirname "$last")
"#;

/// Emits the start marker, then a new segment and playlist every 100 ms.
/// The playlist names the source so tests can tell generations apart.
pub fn healthy() -> Vec<String> {
    fake(
        r#"
echo "Input #0, rtsp, from '$src':" >&2
echo "Output #0, hls, to '$last':" >&2
i=0
while true; do
  printf 'segment %d' "$i" > "$dir/stream_$i.ts"
  printf '#EXTM3U\n# source: %s\n#EXTINF:2.0,\nstream_%d.ts\n' "$src" "$i" > "$last"
  echo "frame=   $i fps=25.0 q=23.0 size=N/A time=00:00:0$i.00" >&2
  i=$((i+1))
  sleep 0.1
done
"#,
    )
}

/// Like [`healthy`], but takes half a second to write its first segment, so a
/// start stays in flight long enough to be overtaken.
pub fn warming() -> Vec<String> {
    fake(
        r#"
echo "Output #0, hls, to '$last':" >&2
sleep 0.5
i=0
while true; do
  printf 'segment %d' "$i" > "$dir/stream_$i.ts"
  printf '#EXTM3U\n# source: %s\n#EXTINF:2.0,\nstream_%d.ts\n' "$src" "$i" > "$last"
  i=$((i+1))
  sleep 0.1
done
"#,
    )
}

/// Never reaches the start marker: the camera is unreachable.
pub fn stalled() -> Vec<String> {
    fake(
        r#"
echo "[tcp @ 0x55d0] Connection to tcp://10.0.0.9:554?timeout=0 failed: Connection timed out" >&2
sleep 30
"#,
    )
}

/// Exits right away, like ffmpeg given a refused RTSP connection.
pub fn refused() -> Vec<String> {
    fake(
        r#"
echo "[rtsp @ 0x55d0] method DESCRIBE failed: 401 Unauthorized" >&2
echo "$src: Server returned 401 Unauthorized (authorization failed)" >&2
exit 1
"#,
    )
}

/// Starts but never writes a segment.
pub fn silent() -> Vec<String> {
    fake(
        r#"
echo "Output #0, hls, to '$last':" >&2
sleep 30
"#,
    )
}

/// Passes the probe but cannot be launched for streaming.
pub fn probe_only() -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        r#"case "$1" in -version) echo 'ffmpeg version 6.1-fake';; *) exit 127;; esac"#
            .to_string(),
        "sh".to_string(),
    ]
}

fn fake(body: &str) -> Vec<String> {
    vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        format!("{}{}", PARSE_ARGS, body),
        "sh".to_string(),
    ]
}

/// Fast-polling settings writing into `dir` on an ephemeral port.
pub fn settings(dir: &Path, transcoder: Vec<String>) -> Settings {
    Settings {
        transcoder,
        output_dir: Some(dir.to_path_buf()),
        preferred_port: 0,
        poll_interval_ms: 50,
        start_attempts: 20,
        generation_attempts: 40,
        kill_grace_ms: 1000,
        ..Settings::default()
    }
}

/// True if a process with this pid still exists (zombies count as gone once reaped).
pub fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

pub async fn port_open(port: u16) -> bool {
    tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok()
}
