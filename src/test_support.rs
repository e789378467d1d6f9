//! Shared helpers for unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::error::ServiceError;
use crate::models::{Separator, SeparatorLoader};

/// Directory holding the fake ffmpeg scripts. Created once per test binary
/// so scripts are never rewritten while another test executes them.
#[cfg(unix)]
fn script_dir() -> &'static Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap().into_path();
        write_script(
            &dir.join("ffmpeg-copy"),
            "while [ \"$#\" -gt 1 ]; do\n  if [ \"$1\" = \"-i\" ]; then src=\"$2\"; fi\n  shift\ndone\ncp \"$src\" \"$1\"\n",
        );
        write_script(
            &dir.join("ffmpeg-partial-fail"),
            "for last; do :; done\necho partial > \"$last\"\necho 'Invalid data found when processing input' >&2\nexit 1\n",
        );
        write_script(&dir.join("ffmpeg-silent"), "exit 0\n");
        dir
    })
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

/// ffmpeg stand-in that copies the input file to the output path.
#[cfg(unix)]
pub fn fake_ffmpeg() -> PathBuf {
    script_dir().join("ffmpeg-copy")
}

/// ffmpeg stand-in that writes partial output and exits with status 1.
#[cfg(unix)]
pub fn partial_then_fail_ffmpeg() -> PathBuf {
    script_dir().join("ffmpeg-partial-fail")
}

/// ffmpeg stand-in that exits 0 without writing anything.
#[cfg(unix)]
pub fn silent_ffmpeg() -> PathBuf {
    script_dir().join("ffmpeg-silent")
}

/// Writes a 16-bit PCM sine tone.
pub fn write_tone(path: &Path, sample_rate: u32, channels: u16, seconds: f32) {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    let frames = (sample_rate as f32 * seconds) as usize;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.3;
        for _ in 0..channels {
            writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// How a [`FakeSeparator`] behaves when asked to separate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Write `stems` stem files.
    #[default]
    WriteStems,
    /// Return an inference error.
    Fail,
    /// Panic inside the inference call.
    Panic,
    /// Succeed without writing anything.
    WriteNothing,
}

/// In-memory stand-in for a separation model.
#[derive(Debug, Clone, Default)]
pub struct FakeSeparator {
    /// Number of stems written per call.
    pub stems: usize,
    /// What each call does.
    pub behavior: FakeBehavior,
    /// Time spent inside each call.
    pub delay: Duration,
    /// Time spent loading.
    pub load_delay: Duration,
    /// Loading fails with an initialization error.
    pub load_fails: bool,
    /// Fail the call if the mix file is missing when it starts or ends.
    pub require_mix: bool,
    /// Number of load attempts.
    pub loads: Arc<AtomicUsize>,
    /// Mix paths in call order.
    pub calls: Arc<Mutex<Vec<PathBuf>>>,
    /// Calls currently running.
    pub active: Arc<AtomicUsize>,
    /// Highest value `active` ever reached.
    pub max_active: Arc<AtomicUsize>,
}

impl FakeSeparator {
    /// A separator that writes `stems` stem files per call.
    pub fn writing(stems: usize) -> Self {
        Self {
            stems,
            ..Default::default()
        }
    }

    /// A separator with the given behavior.
    pub fn behaving(behavior: FakeBehavior) -> Self {
        Self {
            stems: 2,
            behavior,
            ..Default::default()
        }
    }

    /// Returns a loader that yields clones of this separator.
    pub fn loader(&self) -> Box<dyn SeparatorLoader> {
        let fake = self.clone();
        Box::new(move || {
            fake.loads.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(fake.load_delay);
            if fake.load_fails {
                return Err(ServiceError::initialization_failed("fake checkpoint missing"));
            }
            Ok::<_, ServiceError>(Box::new(fake.clone()) as Box<dyn Separator>)
        })
    }

    /// Mix paths seen so far.
    pub fn seen(&self) -> Vec<PathBuf> {
        self.calls.lock().unwrap().clone()
    }
}

impl Separator for FakeSeparator {
    fn separate(&mut self, mix: &Path, out_dir: &Path) -> crate::error::Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(mix.to_path_buf());
        let mix_present = !self.require_mix || mix.is_file();
        std::thread::sleep(self.delay);
        let mix_present = mix_present && (!self.require_mix || mix.is_file());

        if !mix_present {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Err(ServiceError::inference_failed(format!(
                "mix {} disappeared",
                mix.display()
            )));
        }

        let result = match self.behavior {
            FakeBehavior::WriteStems => {
                for i in 1..=self.stems {
                    let path = out_dir.join(format!("index{}.wav", i));
                    crate::audio::wav::write_wav_mono_f32(&[0.0, 0.1, -0.1], &path, 8000)?;
                }
                Ok(())
            }
            FakeBehavior::Fail => Err(ServiceError::inference_failed("fake model exploded")),
            FakeBehavior::Panic => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                panic!("fake model panicked");
            }
            FakeBehavior::WriteNothing => Ok(()),
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn device_name(&self) -> &str {
        "fake"
    }
}
