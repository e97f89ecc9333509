pub mod install;

mod cache;
mod check;
mod init;

pub(crate) use cache::{cmd_cache_clean, cmd_cache_path};
pub(crate) use check::cmd_check;
pub(crate) use init::cmd_init;
pub(crate) use install::cmd_install;

use crate::manifest::DepKind;

/// Which dependency table added packages are saved under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepTarget {
    Normal,
    Dev,
    Optional,
}

impl DepTarget {
    pub fn from_flags(dev: bool, optional: bool) -> DepTarget {
        if dev {
            DepTarget::Dev
        } else if optional {
            DepTarget::Optional
        } else {
            DepTarget::Normal
        }
    }

    pub fn kind(self) -> DepKind {
        match self {
            DepTarget::Normal => DepKind::Normal,
            DepTarget::Dev => DepKind::Dev,
            DepTarget::Optional => DepKind::Optional,
        }
    }
}
