use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use wgpu::Device;

/// Catches validation errors raised while creating GPU resources.
#[must_use = "All error scopes must end in a call to `end`"]
pub struct ValidationErrorScope<'a> {
    device: &'a Device,
    ended: bool,
}

impl<'a> ValidationErrorScope<'a> {
    pub fn new(device: &'a Device) -> Self {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        Self { device, ended: false }
    }

    pub fn end(mut self) -> Result<(), wgpu::Error> {
        self.ended = true;
        let mut future = self.device.pop_error_scope();
        let pin = Pin::new(&mut future);
        match pin.poll(&mut Context::from_waker(&noop_waker::noop_waker())) {
            Poll::Ready(Some(error)) => Err(error),
            Poll::Ready(None) => Ok(()),
            // webgpu resolves scopes asynchronously, assume success
            Poll::Pending => Ok(()),
        }
    }
}

impl<'a> Drop for ValidationErrorScope<'a> {
    fn drop(&mut self) {
        if !self.ended {
            log::error!("ValidationErrorScope dropped without calling `end`");
        }
    }
}
