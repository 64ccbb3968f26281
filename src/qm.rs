//! Argument vectors for `qm` and `qemu-img`.
//!
//! These are the exact invocations issued against a Proxmox VE host. Values
//! from the request are substituted verbatim.

use crate::command::Invocation;
use crate::config::ProvisioningRequest;

/// Warning printed by `qm importdisk` on some Proxmox VE releases. The import
/// itself succeeds.
pub const BENIGN_IMPORT_WARNING: &str = "Use of uninitialized value $dev in hash element";

/// Whether a `qm list` listing contains `vm_id` in its VMID column.
pub fn vm_listed(listing: &str, vm_id: u32) -> bool {
    let id = vm_id.to_string();
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|first| first == id)
}

/// Builds `qm` and `qemu-img` invocations for one request.
pub struct Qm<'a> {
    req: &'a ProvisioningRequest,
}

impl<'a> Qm<'a> {
    pub fn new(req: &'a ProvisioningRequest) -> Self {
        Self { req }
    }

    fn qm(&self, subcommand: &str) -> Invocation {
        Invocation::new(&self.req.qm_bin).arg(subcommand)
    }

    fn vm(&self, subcommand: &str) -> Invocation {
        self.qm(subcommand).arg(self.req.vm_id.to_string())
    }

    fn set(&self) -> Invocation {
        self.vm("set")
    }

    fn image(&self) -> String {
        self.req.image.to_string_lossy().into_owned()
    }

    pub fn list(&self) -> Invocation {
        self.qm("list")
    }

    pub fn destroy(&self) -> Invocation {
        self.vm("destroy")
    }

    /// Resize the source image in place. `--shrink` lets `qemu-img` reduce
    /// the size; it refuses on its own when that would lose data.
    pub fn resize(&self) -> Invocation {
        Invocation::new(&self.req.qemu_img_bin)
            .args(["resize", "--shrink"])
            .arg(self.image())
            .arg(&self.req.vm_size)
    }

    pub fn create(&self) -> Invocation {
        let r = self.req;
        let mut net = format!("virtio,bridge={},mtu=1", r.net_bridge);
        if let Some(tag) = r.net_tag {
            net.push_str(&format!(",tag={tag}"));
        }

        self.vm("create")
            .arg("--name")
            .arg(&r.vm_name)
            .args(["--ostype", "l26"])
            .arg("--memory")
            .arg(r.memory_mb.to_string())
            .args(["--balloon", "0"])
            .args(["--agent", if r.agent { "1" } else { "0" }])
            .args(["--bios", "ovmf"])
            .args(["--machine", "q35"])
            .arg("--efidisk0")
            .arg(format!("{}:0,pre-enrolled-keys=0", r.storage_pool))
            .args(["--cpu", "host"])
            .arg("--cores")
            .arg(r.cores.to_string())
            .args(["--numa", "1"])
            .args(["--vga", "serial0"])
            .args(["--serial0", "socket"])
            .arg("--net0")
            .arg(net)
    }

    pub fn import_disk(&self) -> Invocation {
        self.vm("importdisk")
            .arg(self.image())
            .arg(&self.req.storage_pool)
    }

    /// Attach the imported disk. The EFI disk created with the VM is
    /// `disk-0`, so the import lands on `disk-1`.
    pub fn attach_disk(&self) -> Invocation {
        let r = self.req;
        self.set()
            .args(["--scsihw", "virtio-scsi-pci"])
            .arg("--virtio0")
            .arg(format!(
                "{pool}:{id}/vm-{id}-disk-1.raw,discard=on",
                pool = r.storage_pool,
                id = r.vm_id
            ))
    }

    pub fn cicustom(&self) -> Invocation {
        self.set().arg("--cicustom").arg(format!(
            "vendor={}:snippets/{}",
            self.req.storage_pool, self.req.snippet_name
        ))
    }

    pub fn ciuser(&self) -> Invocation {
        self.set().arg("--ciuser").arg(&self.req.vm_user)
    }

    pub fn sshkeys(&self) -> Invocation {
        self.set()
            .arg("--sshkeys")
            .arg(self.req.ssh_key.to_string_lossy().into_owned())
    }

    pub fn ipconfig_dhcp(&self) -> Invocation {
        self.set().args(["--ipconfig0", "ip=dhcp"])
    }

    pub fn boot_order(&self) -> Invocation {
        self.set().args(["--boot", "order=virtio0"])
    }

    pub fn cloudinit_drive(&self) -> Invocation {
        self.set()
            .arg("--ide2")
            .arg(format!("{}:cloudinit", self.req.storage_pool))
    }

    pub fn template(&self) -> Invocation {
        self.vm("template")
    }
}
