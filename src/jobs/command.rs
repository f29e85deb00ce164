//! LVM commands run by jobs

use serde::{Deserialize, Serialize};

/// Sector size that volume sizes are rounded down to
pub const SECTOR_SIZE: u64 = 512;

/// A mutating LVM operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LvmCommand {
    DeleteGroup {
        group: String,
        /// Member devices to wipe once the group is gone
        wipe_devices: Vec<String>,
    },
    RenameGroup {
        group: String,
        new_name: String,
    },
    AddDevice {
        group: String,
        device: String,
    },
    RemoveDevice {
        group: String,
        device: String,
        wipe: bool,
    },
    EmptyDevice {
        device: String,
        background: bool,
    },
    CreatePlainVolume {
        group: String,
        name: String,
        size: u64,
        stripes: u32,
        stripe_size: u64,
    },
    CreateThinPool {
        group: String,
        name: String,
        size: u64,
    },
    CreateThinVolume {
        group: String,
        name: String,
        size: u64,
        pool: String,
    },
}

/// Round a byte size down to a whole number of sectors
pub fn round_to_sector(size: u64) -> u64 {
    size - size % SECTOR_SIZE
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

impl LvmCommand {
    /// Program invocations to run in order; the job fails at the first
    /// failing step.
    pub fn steps(&self) -> Vec<Vec<String>> {
        match self {
            LvmCommand::DeleteGroup {
                group,
                wipe_devices,
            } => {
                let mut steps = vec![argv(&["vgremove", "-f", group])];
                steps.extend(wipe_devices.iter().map(|d| argv(&["wipefs", "-a", d])));
                steps
            }
            LvmCommand::RenameGroup { group, new_name } => {
                vec![argv(&["vgrename", group, new_name])]
            }
            LvmCommand::AddDevice { group, device } => vec![argv(&["vgextend", group, device])],
            LvmCommand::RemoveDevice {
                group,
                device,
                wipe,
            } => {
                let mut steps = vec![argv(&["vgreduce", group, device])];
                if *wipe {
                    steps.push(argv(&["wipefs", "-a", device]));
                }
                steps
            }
            LvmCommand::EmptyDevice { device, background } => {
                if *background {
                    vec![argv(&["pvmove", "-b", device])]
                } else {
                    vec![argv(&["pvmove", device])]
                }
            }
            LvmCommand::CreatePlainVolume {
                group,
                name,
                size,
                stripes,
                stripe_size,
            } => {
                let mut step = argv(&["lvcreate", group]);
                step.push(format!("-L{}b", round_to_sector(*size)));
                step.extend(argv(&["-n", name]));
                if *stripes > 0 {
                    step.push("-i".into());
                    step.push(stripes.to_string());
                }
                if *stripe_size > 0 {
                    step.push("-I".into());
                    step.push(format!("{}b", stripe_size));
                }
                vec![step]
            }
            LvmCommand::CreateThinPool { group, name, size } => {
                let size = format!("{}b", round_to_sector(*size));
                vec![argv(&["lvcreate", group, "-T", "-L", &size, "--thinpool", name])]
            }
            LvmCommand::CreateThinVolume {
                group,
                name,
                size,
                pool,
            } => {
                let size = format!("{}b", round_to_sector(*size));
                vec![argv(&["lvcreate", group, "--thinpool", pool, "-V", &size, "-n", name])]
            }
        }
    }
}
