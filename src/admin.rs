//! Hooks wired to the admin endpoints.

use serde_json::{json, Value};

use crate::api::types::{Member, MemberStatus};
use crate::api::{AdminRecord, RequestDescriptor, Resource};
use crate::context::AdminContext;
use crate::hooks::{AdminAction, AdminQuery, OptimisticMutation};

/// List query for an admin collection.
pub fn records_query<R: AdminRecord>(ctx: &AdminContext) -> AdminQuery<R> {
  let api = ctx.api().clone();
  let resource = R::RESOURCE;
  AdminQuery::new(ctx, resource.query_key(), move || {
    let api = api.clone();
    async move { api.send(&RequestDescriptor::get(resource.path())).await }
  })
  .with_field(resource.envelope_field())
}

/// POST a new record to a collection.
pub fn create_action(ctx: &AdminContext, resource: Resource) -> AdminAction<Value, Value> {
  let api = ctx.api().clone();
  AdminAction::new(ctx, move |body: Value| {
    let api = api.clone();
    async move { api.send(&RequestDescriptor::post(resource.path(), body)).await }
  })
  .invalidates(resource.query_key())
  .success_message(format!("{} created", resource.label()))
  .error_message(format!("Failed to create {}", resource.label().to_lowercase()))
}

/// DELETE a record by id.
pub fn delete_action(ctx: &AdminContext, resource: Resource) -> AdminAction<String, Value> {
  let api = ctx.api().clone();
  AdminAction::new(ctx, move |id: String| {
    let api = api.clone();
    async move { api.send(&RequestDescriptor::delete(resource.item_path(&id))).await }
  })
  .invalidates(resource.query_key())
  .success_message(format!("{} deleted", resource.label()))
  .error_message(format!("Failed to delete {}", resource.label().to_lowercase()))
}

/// Approve or reject a membership application, showing the new status at once.
pub fn member_status_mutation(
  ctx: &AdminContext,
) -> OptimisticMutation<(String, MemberStatus), Value, Member> {
  let api = ctx.api().clone();
  let notify = ctx.clone();
  let notify_err = ctx.clone();

  OptimisticMutation::new(
    ctx,
    Resource::Members.query_key(),
    move |(id, status): (String, MemberStatus)| {
      let api = api.clone();
      async move {
        let path = format!("{}/status", Resource::Members.item_path(&id));
        api
          .send(&RequestDescriptor::patch(path, json!({ "status": status })))
          .await
      }
    },
    |mut members: Vec<Member>, (id, status): &(String, MemberStatus)| {
      for member in members.iter_mut().filter(|m| &m.id == id) {
        member.status = *status;
      }
      members
    },
  )
  .on_success(move |_| notify.notifier().success("Member status updated"))
  .on_error(move |e| {
    notify_err
      .notifier()
      .error(&format!("Failed to update member status: {}", e))
  })
}

/// Move a safeguarding report to a new workflow status.
pub fn report_status_action(ctx: &AdminContext) -> AdminAction<(String, String), Value> {
  let api = ctx.api().clone();
  AdminAction::new(ctx, move |(id, status): (String, String)| {
    let api = api.clone();
    async move {
      let path = Resource::SafeguardingReports.item_path(&id);
      api
        .send(&RequestDescriptor::patch(path, json!({ "status": status })))
        .await
    }
  })
  .invalidates(Resource::SafeguardingReports.query_key())
  .success_message("Report status updated")
  .error_message("Failed to update report status")
}
