use super::Policy;
use crate::engine::{ByteStream, Query};
use crate::error::{CoreError, Result};
use crate::jsonstream::{collect_progress, relay_progress};
use crate::registry::{Registry, RegistryError, ResourceKind};
use crate::types::BuildOptions;
use serde_json::Value;

const DEFAULT_TAG: &str = "latest";

/// Canonical `repo:tag` form of an image reference.
///
/// Drops the implicit `docker.io/` and `library/` prefixes and adds the
/// implicit `latest` tag. Digest references are returned unchanged.
#[must_use]
pub fn normalize_reference(reference: &str) -> String {
    let reference = reference.strip_prefix("docker.io/").unwrap_or(reference);
    let reference = reference.strip_prefix("library/").unwrap_or(reference);
    if reference.contains('@') {
        return reference.to_string();
    }
    let name_start = reference.rfind('/').map_or(0, |i| i + 1);
    if reference[name_start..].contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:{DEFAULT_TAG}")
    }
}

/// Owned image id for `reference` (tag, full id or short id), if any.
#[must_use]
pub fn image_owned(registry: &Registry, reference: &str) -> Option<String> {
    if reference.is_empty() {
        return None;
    }
    if let Ok(id) = registry.resolve(ResourceKind::Image, reference) {
        return Some(id);
    }
    if !reference.starts_with("sha256:") {
        if let Ok(id) = registry.resolve(ResourceKind::Image, &format!("sha256:{reference}")) {
            return Some(id);
        }
    }
    registry
        .resolve(ResourceKind::Image, &normalize_reference(reference))
        .ok()
}

fn with_tag(name: &str, tag: Option<&str>) -> String {
    match tag.filter(|t| !t.is_empty()) {
        Some(tag) if tag.starts_with("sha256:") => format!("{name}@{tag}"),
        Some(tag) => format!("{name}:{tag}"),
        None => name.to_string(),
    }
}

impl Policy {
    fn owned_image(&self, reference: &str) -> Result<String> {
        image_owned(&self.registry, reference).ok_or_else(|| {
            tracing::warn!(image = reference, "denied: image not owned");
            RegistryError::NotFound {
                kind: ResourceKind::Image,
                id: reference.to_string(),
            }
            .into()
        })
    }

    /// Records `reference` and everything the engine knows it by.
    async fn grant_image(&self, reference: &str) {
        let normalized = normalize_reference(reference);
        match self.engine.image_inspect(reference).await {
            Ok(inspect) => {
                let Some(id) = inspect["Id"].as_str() else {
                    self.registry.record(ResourceKind::Image, normalized);
                    return;
                };
                self.registry.record_alias(ResourceKind::Image, reference, id);
                self.registry.record_alias(ResourceKind::Image, normalized, id);
                for tag in inspect["RepoTags"].as_array().into_iter().flatten() {
                    if let Some(tag) = tag.as_str() {
                        self.registry.record_alias(ResourceKind::Image, tag, id);
                    }
                }
                tracing::info!(image = reference, id, "image granted");
            }
            Err(err) => {
                tracing::warn!(image = reference, "failed to inspect granted image: {err}");
                self.registry.record(ResourceKind::Image, normalized);
            }
        }
    }

    /// Makes sure `image` is owned, pulling it with `auth` if it is not, and
    /// returns the owned id it stands for.
    pub(super) async fn ensure_image(&self, image: &str, auth: Option<&str>) -> Result<String> {
        if let Some(id) = image_owned(&self.registry, image) {
            return Ok(id);
        }

        let denied = |reason: String| {
            tracing::warn!(image, "denied: pull failed: {reason}");
            CoreError::ImageDenied {
                image: image.to_string(),
                reason,
            }
        };
        let progress = match self.engine.image_pull(image, None, auth).await {
            Ok(progress) => progress,
            Err(err) if err.is_transport() => return Err(err.into()),
            Err(err) => return Err(denied(err.to_string())),
        };
        if let Some(reason) = collect_progress(progress).await.error {
            return Err(denied(reason));
        }

        self.grant_image(image).await;
        self.owned_image(image)
    }

    /// Lists owned images.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine call fails.
    pub async fn list_images(&self, query: &Query) -> Result<Vec<Value>> {
        let images = self.engine.image_list(query).await?;
        Ok(images
            .into_iter()
            .filter(|image| {
                image["Id"]
                    .as_str()
                    .is_some_and(|id| self.registry.contains(ResourceKind::Image, id))
            })
            .collect())
    }

    /// # Errors
    ///
    /// Returns an error if the image is not owned or the engine call fails.
    pub async fn inspect_image(&self, name: &str) -> Result<Value> {
        let id = self.owned_image(name)?;
        Ok(self.engine.image_inspect(&id).await?)
    }

    /// Pulls `from_image[:tag]` with the caller's credentials.
    ///
    /// Progress is streamed back as the engine produces it. Ownership is
    /// granted once the stream has completed without an error message and
    /// before the returned stream ends.
    ///
    /// # Errors
    ///
    /// Returns an error if no image is named or the engine refuses the pull
    /// outright.
    pub async fn pull_image(
        &self,
        from_image: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> Result<ByteStream> {
        if from_image.is_empty() {
            return Err(CoreError::invalid("fromImage is required"));
        }
        let tag = tag.filter(|t| !t.is_empty());
        let reference = with_tag(from_image, tag);
        let progress = self.engine.image_pull(from_image, tag, auth).await?;

        let policy = self.clone();
        Ok(relay_progress(progress, move |report| async move {
            match report.error {
                None => policy.grant_image(&reference).await,
                Some(reason) => {
                    tracing::warn!(image = %reference, "pull failed, nothing granted: {reason}");
                }
            }
        }))
    }

    /// Tags an owned image and records the new reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is not owned or the engine call fails.
    pub async fn tag_image(&self, source: &str, repo: &str, tag: Option<&str>) -> Result<()> {
        if repo.is_empty() {
            return Err(CoreError::invalid("repo is required"));
        }
        let id = self.owned_image(source)?;
        let tag = tag.filter(|t| !t.is_empty());
        self.engine.image_tag(&id, repo, tag).await?;

        let reference = with_tag(repo, tag);
        self.registry
            .record_alias(ResourceKind::Image, normalize_reference(&reference), id.as_str());
        self.registry
            .record_alias(ResourceKind::Image, reference, id.as_str());
        Ok(())
    }

    /// Pushes an owned `name[:tag]`, `latest` when no tag is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is not owned or the engine refuses
    /// the push outright.
    pub async fn push_image(
        &self,
        name: &str,
        tag: Option<&str>,
        auth: Option<&str>,
    ) -> Result<ByteStream> {
        // Without a tag the engine pushes every local tag of the repository.
        let tag = tag.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_TAG);
        let reference = with_tag(name, Some(tag));
        let owned = self.registry.contains(ResourceKind::Image, &reference)
            || self
                .registry
                .contains(ResourceKind::Image, &normalize_reference(&reference));
        if !owned {
            tracing::warn!(image = %reference, "denied: push of image not owned");
            return Err(RegistryError::NotFound {
                kind: ResourceKind::Image,
                id: reference,
            }
            .into());
        }

        let progress = self.engine.image_push(name, Some(tag), auth).await?;
        Ok(relay_progress(progress, move |report| async move {
            if let Some(reason) = report.error {
                tracing::warn!(image = %reference, "push failed: {reason}");
            }
        }))
    }

    /// Builds an image confined to the gateway's cgroup.
    ///
    /// Images produced by a successful build (the reported id and every
    /// requested tag) become owned.
    ///
    /// # Errors
    ///
    /// Returns an error if the options ask for host networking or the engine
    /// refuses the build outright.
    pub async fn build_image(
        &self,
        mut options: BuildOptions,
        registry_config: Option<&str>,
        context: ByteStream,
    ) -> Result<ByteStream> {
        if options.values("networkmode").any(|mode| mode == "host") {
            tracing::warn!("denied: build with host networking");
            return Err(CoreError::forbidden("networkmode=host is not allowed"));
        }
        options.set("cgroupparent", self.identity.cgroup_parent());
        let tags: Vec<String> = options
            .values("t")
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .collect();

        let progress = self
            .engine
            .image_build(&options, registry_config, context)
            .await?;

        let policy = self.clone();
        Ok(relay_progress(progress, move |report| async move {
            if let Some(reason) = report.error {
                tracing::warn!("build failed, nothing granted: {reason}");
                return;
            }
            match report.image_id {
                Some(id) => {
                    policy.registry.record(ResourceKind::Image, id.as_str());
                    for tag in &tags {
                        policy
                            .registry
                            .record_alias(ResourceKind::Image, normalize_reference(tag), id.as_str());
                        policy
                            .registry
                            .record_alias(ResourceKind::Image, tag.as_str(), id.as_str());
                    }
                    tracing::info!(id = %id, "built image granted");
                }
                None => {
                    for tag in &tags {
                        policy.grant_image(tag).await;
                    }
                }
            }
        }))
    }
}
