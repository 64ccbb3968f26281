//! The provisioning sequence: cloud image in, Proxmox template out.
//!
//! Steps run strictly in order and the first failure ends the run. Nothing
//! is rolled back; the only corrective action is destroying a VM that
//! already holds the target id before creating a new one.

use crate::command::{self, Host, Invocation};
use crate::config::ProvisioningRequest;
use crate::error::TemplateError;
use crate::progress::{Step, StepProgress};
use crate::qm::{self, Qm};

/// Number of numbered steps shown by [`Provisioner::run`].
pub const STEPS: usize = 8;

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    pub vm_id: u32,
    pub name: String,
    pub replaced_existing: bool,
    pub commands_run: usize,
}

pub struct Provisioner<H: Host> {
    request: ProvisioningRequest,
    host: H,
    commands_run: usize,
}

impl<H: Host> Provisioner<H> {
    pub fn new(request: ProvisioningRequest, host: H) -> Self {
        Self {
            request,
            host,
            commands_run: 0,
        }
    }

    pub fn into_host(self) -> H {
        self.host
    }

    /// Run the whole sequence.
    pub fn run(&mut self, progress: &mut StepProgress) -> Result<ProvisioningReport, TemplateError> {
        let id = self.request.vm_id;
        tracing::info!(vm_id = id, name = %self.request.vm_name, "building template");

        let exists = progress.run(&format!("Checking whether VM {id} exists"), |step| {
            self.vm_exists(step)
        })?;

        if exists {
            progress.run(&format!("Destroying existing VM {id}"), |step| {
                self.destroy(step)
            })?;
        } else {
            progress.skip(&format!("VM {id} not present, nothing to destroy"));
        }

        progress.run("Resizing image", |step| self.resize_image(step))?;
        progress.run(&format!("Creating temporary VM {id}"), |step| {
            self.create_vm(step)
        })?;
        progress.run("Importing disk", |step| self.import_disk(step))?;
        progress.run("Setting up Cloud-Init", |step| self.setup_cloud_init(step))?;
        progress.run("Setting boot order", |step| self.set_boot_order(step))?;
        progress.run("Converting VM to template", |step| self.convert_to_template(step))?;

        tracing::info!(vm_id = id, commands = self.commands_run, "template created");
        Ok(ProvisioningReport {
            vm_id: id,
            name: self.request.vm_name.clone(),
            replaced_existing: exists,
            commands_run: self.commands_run,
        })
    }

    fn exec(&mut self, step: &Step, invocation: Invocation) -> Result<String, TemplateError> {
        self.exec_tolerating(step, invocation, &[])
    }

    fn exec_tolerating(
        &mut self,
        step: &Step,
        invocation: Invocation,
        tolerated: &[&str],
    ) -> Result<String, TemplateError> {
        tracing::debug!(command = %invocation, "running");
        step.log(&invocation.to_string());

        let result = self.host.run(&invocation)?;
        self.commands_run += 1;

        let stdout = command::check(&invocation, result, tolerated).inspect_err(|e| {
            tracing::error!(command = %invocation, "{e}");
        })?;
        if !stdout.is_empty() {
            tracing::debug!(command = %invocation, "{stdout}");
        }
        Ok(stdout)
    }

    fn vm_exists(&mut self, step: &Step) -> Result<bool, TemplateError> {
        let listing = self.exec(step, Qm::new(&self.request).list())?;
        let exists = qm::vm_listed(&listing, self.request.vm_id);
        if exists {
            step.set_done_label(format!("VM {} already exists", self.request.vm_id));
        } else {
            step.set_done_label(format!("VM {} is free", self.request.vm_id));
        }
        Ok(exists)
    }

    fn destroy(&mut self, step: &Step) -> Result<(), TemplateError> {
        tracing::warn!(vm_id = self.request.vm_id, "VM id already in use, destroying it");
        self.exec(step, Qm::new(&self.request).destroy())?;
        step.set_done_label(format!("Destroyed existing VM {}", self.request.vm_id));
        Ok(())
    }

    fn resize_image(&mut self, step: &Step) -> Result<(), TemplateError> {
        self.exec(step, Qm::new(&self.request).resize())?;
        step.set_done_label(format!("Image resized to {}", self.request.vm_size));
        Ok(())
    }

    fn create_vm(&mut self, step: &Step) -> Result<(), TemplateError> {
        self.exec(step, Qm::new(&self.request).create())?;
        step.set_done_label(format!(
            "Temporary VM {} ({}) created",
            self.request.vm_id, self.request.vm_name
        ));
        Ok(())
    }

    fn import_disk(&mut self, step: &Step) -> Result<(), TemplateError> {
        let inv = Qm::new(&self.request).import_disk();
        self.exec_tolerating(step, inv, &[qm::BENIGN_IMPORT_WARNING])?;
        step.set_done_label(format!("Disk imported into {}", self.request.storage_pool));
        Ok(())
    }

    fn setup_cloud_init(&mut self, step: &Step) -> Result<(), TemplateError> {
        let dest = self
            .host
            .install_snippet(&self.request.ci_file, &self.request.snippets_dir)?;
        step.log(&format!("snippet installed at {}", dest.display()));

        let qm = Qm::new(&self.request);
        let commands = [
            qm.attach_disk(),
            qm.cicustom(),
            qm.ciuser(),
            qm.sshkeys(),
            qm.ipconfig_dhcp(),
        ];
        for inv in commands {
            self.exec(step, inv)?;
        }
        step.set_done_label("Cloud-Init configured");
        Ok(())
    }

    fn set_boot_order(&mut self, step: &Step) -> Result<(), TemplateError> {
        let qm = Qm::new(&self.request);
        let commands = [qm.boot_order(), qm.cloudinit_drive()];
        for inv in commands {
            self.exec(step, inv)?;
        }
        step.set_done_label("Boot order set");
        Ok(())
    }

    fn convert_to_template(&mut self, step: &Step) -> Result<(), TemplateError> {
        self.exec(step, Qm::new(&self.request).template())?;
        step.set_done_label(format!("VM {} converted to template", self.request.vm_id));
        Ok(())
    }
}
