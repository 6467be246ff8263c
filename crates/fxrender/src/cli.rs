use std::path::PathBuf;

use clap::Parser;

use crate::settings::Setting;

#[derive(Parser, Debug)]
#[command(
    name = "fxrender",
    author,
    version,
    about = "Apply the postfx pipeline to a still image"
)]
pub struct Cli {
    /// Image to process (PNG, JPEG, BMP or GIF).
    #[arg(long, short, value_name = "PATH")]
    pub input: PathBuf,

    /// Where to write the processed PNG.
    #[arg(long, short, value_name = "PATH")]
    pub output: PathBuf,

    /// Pipeline configuration TOML; can also be supplied via `FXRENDER_CONFIG`.
    #[arg(long, short, env = "FXRENDER_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Landmark JSON: a flat array of 212 values per face, or one array per face.
    #[arg(long, value_name = "FILE")]
    pub landmarks: Option<PathBuf>,

    /// Segmentation mask image; white keeps the foreground.
    #[arg(long, value_name = "PATH")]
    pub mask: Option<PathBuf>,

    /// Frames to render before writing, so remote assets can arrive.
    #[arg(long, value_name = "N", default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: u32,

    /// How long to wait for pending assets before the last frame (e.g. `5s`).
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    pub settle: f32,

    /// Override one setting, e.g. `smooth=0.6`, `lut=ziran`, `style=sketch`,
    /// `background=#00ff00` or `enlargeEye=0.4`. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_setting)]
    pub settings: Vec<Setting>,

    /// Print the effective settings as TOML and exit without rendering.
    #[arg(long)]
    pub print_settings: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_setting(value: &str) -> Result<Setting, String> {
    value.parse::<Setting>().map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_repeated_settings() {
        let cli = Cli::try_parse_from([
            "fxrender",
            "--input",
            "in.png",
            "--output",
            "out.png",
            "--set",
            "smooth=0.5",
            "--set",
            "style=sketch",
        ])
        .expect("valid arguments");
        assert_eq!(cli.settings.len(), 2);
        assert_eq!(cli.frames, 3);
    }

    #[test]
    fn rejects_malformed_settings() {
        let err = Cli::try_parse_from([
            "fxrender", "--input", "a.png", "--output", "b.png", "--set", "smooth",
        ])
        .expect_err("missing '=' must fail");
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn zero_frames_is_rejected() {
        assert!(Cli::try_parse_from([
            "fxrender", "--input", "a.png", "--output", "b.png", "--frames", "0",
        ])
        .is_err());
    }
}
