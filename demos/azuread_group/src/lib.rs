use crate::directory::{DirectoryConnector, GroupDirectory, NewGroup};
use crate::group::{GroupModel, SECURITY_GROUP};
use async_trait::async_trait;
use extension::handler::HandlerContext;
use extension::identifier::naked_identifier_from_string;
use extension::{ConsecutiveObservations, HandlerError, ResourceProvider};
use lambda_runtime::tracing;
use model::{Error, ProgressEvent};
use std::sync::Arc;
use std::time::Duration;

pub mod directory;
pub mod group;

pub const TYPE_NAME: &str = "Dotmatics::AzureAD::Group";
/// Should match the handler timeouts declared in the resource schema
pub const TOTAL_TIMEOUT_MINUTES: u32 = 5;

const GROUP_CREATED: &str = "_create_action1";
const GROUP_DELETED: &str = "_delete_group";
const STABILIZE_CREATION: &str = "_stabilize_group_creation";
const STABILIZE_DELETION: &str = "_stabilize_group_deletion";
const DIRECTORY_RETRY: Duration = Duration::from_secs(3);

pub struct GroupProvider {
    connector: Box<dyn DirectoryConnector>,
}

impl GroupProvider {
    pub fn new(connector: Box<dyn DirectoryConnector>) -> Self {
        GroupProvider { connector }
    }

    async fn connect(&self, model: &GroupModel) -> Result<Arc<dyn GroupDirectory>, Error> {
        self.connector.connect(&model.credentials()?).await
    }

    /// Later create invocations: wait until the new group is visible by name.
    async fn stabilize_creation(
        &self,
        mut handler: HandlerContext<GroupModel>,
    ) -> Result<ProgressEvent<GroupModel>, Error> {
        let model: GroupModel = handler.model_from_callback()?;
        let connection: Arc<dyn GroupDirectory> = self.connect(&model).await?;
        let directory: &dyn GroupDirectory = connection.as_ref();
        let group_name: &str = model.required_group_name()?;

        let mut created = ConsecutiveObservations::new(STABILIZE_CREATION, move || {
            directory.exists_by_name(group_name)
        });

        if let Some(in_progress) = handler
            .run_with_stabilization(&mut [&mut created], DIRECTORY_RETRY, Some(model.clone()))
            .await?
        {
            return Ok(in_progress);
        }

        self.read(handler.downstream().with_desired_model(model))
            .await
    }
}

#[async_trait(?Send)]
impl ResourceProvider<GroupModel> for GroupProvider {
    async fn create(
        &self,
        mut handler: HandlerContext<GroupModel>,
    ) -> Result<ProgressEvent<GroupModel>, Error> {
        if handler.callback_context().flag(GROUP_CREATED) {
            return self.stabilize_creation(handler).await;
        }

        let mut model: GroupModel = handler.desired_model()?.clone();
        let new_group = NewGroup {
            display_name: model.required_group_name()?.to_string(),
            description: model.group_description.clone(),
            owner_ids: Vec::new(),
        };
        let owner_names: Vec<String> = model
            .owner_names()?
            .into_iter()
            .map(str::to_string)
            .collect();
        model.credentials()?;

        let event: ProgressEvent<GroupModel> = handler
            .create_resource(None, async |handler, session| {
                let directory: Arc<dyn GroupDirectory> = self.connect(&model).await?;

                let mut new_group: NewGroup = new_group;
                for owner_name in &owner_names {
                    new_group
                        .owner_ids
                        .push(directory.find_user_id(owner_name).await?);
                }

                let group_id: String = directory.create_group(&new_group).await?;
                tracing::info!("Created group {group_id} named {}", new_group.display_name);

                let identifier: String = handler.generate_id(&group_id);
                model.group_id = Some(group_id);
                model.generated_id = Some(identifier.clone());

                handler.save_model_to_callback(&model)?;
                handler.callback_context_mut().set_flag(GROUP_CREATED);
                session.set_resource_created(identifier, model.clone());

                Ok(handler.in_progress("Group created, stabilizing", 4, Some(model.clone())))
            })
            .await?;

        Ok(event)
    }

    async fn read(
        &self,
        mut handler: HandlerContext<GroupModel>,
    ) -> Result<ProgressEvent<GroupModel>, Error> {
        let identifier: String =
            handler.validate_identifier(handler.desired_model()?.generated_id.as_deref())?;

        let model: GroupModel = handler
            .read_resource(&identifier, async |_, session| {
                let stored: GroupModel = session.read_model();
                let directory: Arc<dyn GroupDirectory> = self.connect(&stored).await?;
                let group = directory
                    .get_group(&naked_identifier_from_string(&identifier)?)
                    .await?;

                let refreshed = GroupModel {
                    group_name: Some(group.display_name),
                    group_type: Some(
                        group
                            .group_types
                            .into_iter()
                            .next()
                            .unwrap_or_else(|| SECURITY_GROUP.to_string()),
                    ),
                    group_id: Some(group.id),
                    ..stored
                };

                session.update_model(refreshed.clone());
                Ok(refreshed)
            })
            .await?;

        Ok(handler.success(model.without_credentials()))
    }

    async fn update(
        &self,
        mut handler: HandlerContext<GroupModel>,
    ) -> Result<ProgressEvent<GroupModel>, Error> {
        let mut desired: GroupModel = handler.desired_model()?.clone();
        let identifier: String = handler.validate_identifier(desired.generated_id.as_deref())?;

        let model: GroupModel = handler
            .update_resource(&identifier, async |_, session| {
                // Tenant, name and type cannot change after creation
                let stored: GroupModel = session.read_model();
                desired.credential_tenant_id = stored.credential_tenant_id;
                desired.group_name = stored.group_name;
                desired.group_type = stored.group_type;
                desired.group_id = stored.group_id;

                let directory: Arc<dyn GroupDirectory> = self.connect(&desired).await?;
                directory.validate_credentials().await?;

                let group = directory
                    .get_group(&naked_identifier_from_string(&identifier)?)
                    .await?;
                if desired.group_name.as_deref() != Some(group.display_name.as_str()) {
                    return Err(HandlerError::InternalFailure(format!(
                        "Group {} has been renamed to {} outside of CloudFormation",
                        group.id, group.display_name
                    ))
                    .into());
                }

                session.update_model(desired.clone());
                Ok(desired)
            })
            .await?;

        self.read(handler.downstream().with_desired_model(model))
            .await
    }

    async fn delete(
        &self,
        mut handler: HandlerContext<GroupModel>,
    ) -> Result<ProgressEvent<GroupModel>, Error> {
        let identifier: String =
            handler.validate_identifier(handler.desired_model()?.generated_id.as_deref())?;

        let event: ProgressEvent<GroupModel> = handler
            .delete_resource(&identifier, async |handler, session| {
                let model: GroupModel = session.read_model();
                let connection: Arc<dyn GroupDirectory> = self.connect(&model).await?;
                let directory: &dyn GroupDirectory = connection.as_ref();

                if !handler.callback_context().flag(GROUP_DELETED) {
                    directory
                        .delete_group(&naked_identifier_from_string(&identifier)?)
                        .await?;
                    tracing::info!("Deleted group {identifier}");

                    handler.callback_context_mut().set_flag(GROUP_DELETED);
                    handler.save_model_to_callback(&model)?;
                    return Ok(handler.in_progress("Group deleted, stabilizing", 1, Some(model)));
                }

                let group_name: &str = model.required_group_name()?;
                let mut deleted =
                    ConsecutiveObservations::new(STABILIZE_DELETION, move || async move {
                        Ok::<bool, Error>(!directory.exists_by_name(group_name).await?)
                    });

                if let Some(in_progress) = handler
                    .run_with_stabilization(&mut [&mut deleted], DIRECTORY_RETRY, Some(model.clone()))
                    .await?
                {
                    return Ok(in_progress);
                }

                session.set_resource_deleted();
                Ok(handler.success_delete())
            })
            .await?;

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{DirectoryCredentials, DirectoryGroup};
    use crate::group::Owner;
    use extension::ExtensionConfig;
    use extension::handle_event;
    use extension::runtime::ExtensionRuntime;
    use model::{Action, CallbackContext, HandlerErrorCode, OperationStatus};
    use state_in_memory::InMemoryRecordStore;
    use std::collections::BTreeMap;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use test_utils::{ManualClock, provider_event, stack_request};

    const SECRET: &str = "token";
    const OWNER: &str = "APP 123";

    /// A tenant with a single user, shared by every connection
    #[derive(Default)]
    struct Tenant {
        groups: Mutex<BTreeMap<String, DirectoryGroup>>,
        /// Newly created groups are not yet listed by name
        replicating: AtomicBool,
        created: AtomicUsize,
    }

    struct FakeDirectory {
        tenant: Arc<Tenant>,
        authorized: bool,
    }

    impl FakeDirectory {
        fn authorize(&self) -> Result<(), Error> {
            if self.authorized {
                Ok(())
            } else {
                Err(io::Error::other("AADSTS7000215: Invalid client secret provided").into())
            }
        }

        fn groups(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DirectoryGroup>> {
            self.tenant.groups.lock().expect("Lock should not be poisoned")
        }
    }

    #[async_trait]
    impl GroupDirectory for FakeDirectory {
        async fn validate_credentials(&self) -> Result<(), Error> {
            self.authorize()
        }

        async fn find_user_id(&self, user_principal_name: &str) -> Result<String, Error> {
            self.authorize()?;
            match user_principal_name {
                OWNER => Ok("user-1".to_string()),
                _ => Err(io::Error::other(format!("No user {user_principal_name}")).into()),
            }
        }

        async fn create_group(&self, group: &NewGroup) -> Result<String, Error> {
            self.authorize()?;
            let created: usize = self.tenant.created.fetch_add(1, Ordering::SeqCst) + 1;
            let group_id: String = format!("group-{created}");
            self.groups().insert(
                group_id.clone(),
                DirectoryGroup {
                    id: group_id.clone(),
                    display_name: group.display_name.clone(),
                    group_types: vec![],
                },
            );

            Ok(group_id)
        }

        async fn get_group(&self, group_id: &str) -> Result<DirectoryGroup, Error> {
            self.authorize()?;
            self.groups()
                .get(group_id)
                .cloned()
                .ok_or_else(|| io::Error::other(format!("No group {group_id}")).into())
        }

        async fn exists_by_name(&self, display_name: &str) -> Result<bool, Error> {
            self.authorize()?;
            if self.tenant.replicating.load(Ordering::SeqCst) {
                return Ok(false);
            }

            Ok(self
                .groups()
                .values()
                .any(|group| group.display_name == display_name))
        }

        async fn delete_group(&self, group_id: &str) -> Result<(), Error> {
            self.authorize()?;
            self.groups().remove(group_id);
            Ok(())
        }
    }

    struct FakeConnector {
        tenant: Arc<Tenant>,
    }

    #[async_trait]
    impl DirectoryConnector for FakeConnector {
        async fn connect(
            &self,
            credentials: &DirectoryCredentials,
        ) -> Result<Arc<dyn GroupDirectory>, Error> {
            Ok(Arc::new(FakeDirectory {
                tenant: self.tenant.clone(),
                authorized: credentials.client_secret == SECRET,
            }))
        }
    }

    struct Fixture {
        runtime: ExtensionRuntime,
        provider: GroupProvider,
        tenant: Arc<Tenant>,
    }

    fn fixture() -> Fixture {
        let tenant: Arc<Tenant> = Arc::new(Tenant::default());
        let runtime = ExtensionRuntime::new(
            TYPE_NAME,
            Arc::new(InMemoryRecordStore::new()),
            ExtensionConfig::default(),
            TOTAL_TIMEOUT_MINUTES,
        )
        .with_clock(Arc::new(ManualClock::starting_at_epoch()));

        Fixture {
            runtime,
            provider: GroupProvider::new(Box::new(FakeConnector {
                tenant: tenant.clone(),
            })),
            tenant,
        }
    }

    fn desired() -> GroupModel {
        GroupModel {
            group_name: Some("Test Group".to_string()),
            group_type: Some(SECURITY_GROUP.to_string()),
            group_description: Some("GROUP DESCRIPTION".to_string()),
            owners: Some(vec![Owner {
                owner_type: Some("USER".to_string()),
                name: Some(OWNER.to_string()),
            }]),
            credential_app_client_id: Some("123".to_string()),
            credential_app_api_token: Some(SECRET.to_string()),
            credential_tenant_id: Some("123432432".to_string()),
            ..GroupModel::default()
        }
    }

    async fn send(
        fixture: &Fixture,
        action: Action,
        model: GroupModel,
        callback_context: Option<CallbackContext>,
    ) -> ProgressEvent<GroupModel> {
        handle_event(
            &fixture.runtime,
            &fixture.provider,
            provider_event(action, stack_request(Some(model)), callback_context),
        )
        .await
    }

    /// Drive an operation through its invocations until it finishes.
    async fn drive(fixture: &Fixture, action: Action, model: GroupModel) -> ProgressEvent<GroupModel> {
        let mut event: ProgressEvent<GroupModel> = send(fixture, action, model.clone(), None).await;

        while event.status == OperationStatus::InProgress {
            event = send(fixture, action, model.clone(), event.callback_context).await;
        }

        event
    }

    async fn created(fixture: &Fixture) -> GroupModel {
        drive(fixture, Action::Create, desired())
            .await
            .resource_model
            .expect("Create should return the model")
    }

    fn group_count(fixture: &Fixture) -> usize {
        fixture
            .tenant
            .groups
            .lock()
            .expect("Lock should not be poisoned")
            .len()
    }

    #[tokio::test]
    async fn create_yields_then_stabilizes() {
        let fixture: Fixture = fixture();

        let first: ProgressEvent<GroupModel> = send(&fixture, Action::Create, desired(), None).await;
        assert_eq!(OperationStatus::InProgress, first.status);
        assert_eq!(4, first.callback_delay_seconds);
        assert_eq!(1, group_count(&fixture));

        let second: ProgressEvent<GroupModel> =
            send(&fixture, Action::Create, desired(), first.callback_context).await;
        assert_eq!(OperationStatus::Success, second.status);

        let model: GroupModel = second.resource_model.expect("Create should return the model");
        assert_eq!(Some("group-1".to_string()), model.group_id);
        assert_eq!(Some(SECURITY_GROUP.to_string()), model.group_type);
        assert!(model
            .generated_id
            .as_deref()
            .is_some_and(|id| id.ends_with("|group-1")));
        assert_eq!(None, model.credential_app_api_token);
        // Only one group despite the re-invocation
        assert_eq!(1, group_count(&fixture));
    }

    #[tokio::test]
    async fn create_keeps_yielding_until_group_is_listed() {
        let fixture: Fixture = fixture();
        fixture.tenant.replicating.store(true, Ordering::SeqCst);

        let first: ProgressEvent<GroupModel> = send(&fixture, Action::Create, desired(), None).await;
        let waiting: ProgressEvent<GroupModel> =
            send(&fixture, Action::Create, desired(), first.callback_context).await;
        assert_eq!(OperationStatus::InProgress, waiting.status);
        assert_eq!(0, waiting.callback_delay_seconds);

        fixture.tenant.replicating.store(false, Ordering::SeqCst);
        let done: ProgressEvent<GroupModel> =
            send(&fixture, Action::Create, desired(), waiting.callback_context).await;
        assert_eq!(OperationStatus::Success, done.status);
    }

    #[tokio::test]
    async fn unsupported_owner_fails_before_touching_the_directory() {
        let fixture: Fixture = fixture();
        let mut model: GroupModel = desired();
        model.owners = Some(vec![Owner {
            owner_type: Some("GROUP".to_string()),
            name: Some("Admins".to_string()),
        }]);

        let event: ProgressEvent<GroupModel> = send(&fixture, Action::Create, model, None).await;

        assert_eq!(Some(HandlerErrorCode::InvalidRequest), event.error_code);
        assert_eq!(0, group_count(&fixture));
    }

    #[tokio::test]
    async fn update_changes_description_and_keeps_name() {
        let fixture: Fixture = fixture();
        let mut model: GroupModel = created(&fixture).await;
        model.credential_app_client_id = Some("123".to_string());
        model.credential_app_api_token = Some(SECRET.to_string());
        model.group_description = Some("NEW DESCRIPTION".to_string());
        model.group_name = Some("Renamed".to_string());

        let event: ProgressEvent<GroupModel> = send(&fixture, Action::Update, model, None).await;

        assert_eq!(OperationStatus::Success, event.status);
        let updated: GroupModel = event.resource_model.expect("Update should return the model");
        assert_eq!(Some("NEW DESCRIPTION".to_string()), updated.group_description);
        assert_eq!(Some("Test Group".to_string()), updated.group_name);
    }

    #[tokio::test]
    async fn update_with_rejected_credentials_fails_generically() {
        let fixture: Fixture = fixture();
        let mut model: GroupModel = created(&fixture).await;
        model.credential_app_client_id = Some("123".to_string());
        model.credential_app_api_token = Some("wrong".to_string());

        let event: ProgressEvent<GroupModel> = send(&fixture, Action::Update, model, None).await;

        assert_eq!(Some(HandlerErrorCode::InternalFailure), event.error_code);
        assert!(!event.message.contains("AADSTS"));
    }

    #[tokio::test]
    async fn delete_removes_group_then_record() {
        let fixture: Fixture = fixture();
        let model: GroupModel = created(&fixture).await;

        let first: ProgressEvent<GroupModel> = send(&fixture, Action::Delete, model.clone(), None).await;
        assert_eq!(OperationStatus::InProgress, first.status);
        assert_eq!(1, first.callback_delay_seconds);
        assert_eq!(0, group_count(&fixture));

        let second: ProgressEvent<GroupModel> =
            send(&fixture, Action::Delete, model.clone(), first.callback_context).await;
        assert_eq!(OperationStatus::Success, second.status);

        let read: ProgressEvent<GroupModel> = send(&fixture, Action::Read, model, None).await;
        assert_eq!(Some(HandlerErrorCode::NotFound), read.error_code);
    }

    #[tokio::test]
    async fn created_groups_are_listed() {
        let fixture: Fixture = fixture();
        let model: GroupModel = created(&fixture).await;

        let listed: ProgressEvent<GroupModel> =
            send(&fixture, Action::List, GroupModel::default(), None).await;

        assert_eq!(
            Some(vec![GroupModel {
                generated_id: model.generated_id,
                ..GroupModel::default()
            }]),
            listed.resource_models
        );
    }
}
