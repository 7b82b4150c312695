// CLI definitions using clap

use clap::{Parser, Subcommand, ValueEnum};

use qmk_backlight::FeedKind;
use qmk_keyboard::RgbColor;
use qmk_transport::ReadMode;

#[derive(Parser)]
#[command(name = "qmk_backlightd")]
#[command(author, version, about = "RGB backlight driver for QMK keyboards (VIA raw HID)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Debug logging for the driver crates
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Per-read timeout in milliseconds
    #[arg(long, global = true, default_value_t = 500, value_name = "MS")]
    pub read_timeout: u64,

    /// Read replies from the interrupt endpoint instead of GET_REPORT
    #[arg(long, global = true)]
    pub interrupt: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn read_mode(&self) -> ReadMode {
        if self.interrupt {
            ReadMode::Interrupt
        } else {
            ReadMode::GetReport
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List raw HID interfaces and whether they can be driven
    #[command(visible_alias = "ls")]
    Scan,

    /// Set the backlight color of every keyboard found
    Set {
        /// Color as RRGGBB (e.g. ff8000)
        color: RgbColor,
        /// Only this endpoint (e.g. "Planck:backlight")
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Keep backlights registered across hot-plug until Ctrl+C
    Watch {
        /// Apply this color to every newly registered keyboard
        #[arg(short, long)]
        color: Option<RgbColor>,
        /// Event source
        #[arg(long, value_enum, default_value_t = FeedArg::Poll)]
        feed: FeedArg,
        /// Enumeration period for the poll feed
        #[arg(long, default_value_t = 1000, value_name = "MS")]
        poll_interval: u64,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FeedArg {
    Poll,
    Udev,
}

impl From<FeedArg> for FeedKind {
    fn from(arg: FeedArg) -> Self {
        match arg {
            FeedArg::Poll => FeedKind::Poll,
            FeedArg::Udev => FeedKind::Udev,
        }
    }
}
