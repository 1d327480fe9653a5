//! Shell commands spliced into the bootstrap document.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Device name the swap volume is attached under.
pub const SWAP_DEVICE: &str = "/dev/sdf";

/// Commands run before the caller's own `runcmd` entries.
pub(crate) fn hostname_commands(hostname: &str) -> Vec<String> {
    vec![format!(
        "hostnamectl set-hostname {}",
        escape(Cow::Borrowed(hostname))
    )]
}

/// Commands enabling the swap volume once it is attached.
pub(crate) fn swap_commands(device: &str) -> Vec<String> {
    let quoted = escape(Cow::Borrowed(device));
    let fstab_line = format!("{device} none swap sw 0 0");
    vec![
        format!("while [ ! -e {quoted} ]; do sleep 1; done"),
        format!("mkswap {quoted}"),
        format!("swapon {quoted}"),
        format!(
            "grep -q '^{device} ' /etc/fstab || echo {} >> /etc/fstab",
            escape(Cow::Owned(fstab_line))
        ),
    ]
}
